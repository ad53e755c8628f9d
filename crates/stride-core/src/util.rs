//! Small helpers shared by config, delivery and logging.

use std::hash::{Hash, Hasher};

/// Longest backend error text carried into a queue entry's `last_error`
const ERROR_EXCERPT_CHARS: usize = 180;

/// Trimmed value of an optional setting; blank counts as unset.
pub fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Whether `value` is an absolute `http` or `https` URL
pub fn is_http_url(value: &str) -> bool {
    match value.split_once("://") {
        Some((scheme, rest)) => {
            !rest.is_empty()
                && (scheme.eq_ignore_ascii_case("http") || scheme.eq_ignore_ascii_case("https"))
        }
        None => false,
    }
}

/// Single-line excerpt of a backend error body.
///
/// Runs of whitespace (including newlines in HTML error pages) collapse to
/// one space before the text is cut to [`ERROR_EXCERPT_CHARS`] characters.
pub fn error_excerpt(body: &str) -> String {
    let mut excerpt = String::new();
    for (taken, word) in body.split_whitespace().enumerate() {
        if taken > 0 {
            excerpt.push(' ');
        }
        excerpt.push_str(word);
        if excerpt.chars().count() >= ERROR_EXCERPT_CHARS {
            break;
        }
    }
    excerpt.chars().take(ERROR_EXCERPT_CHARS).collect()
}

/// Hash of an owner id, for log fields that must not carry the raw identifier.
///
/// Only meant for correlating log lines written by the same build: the
/// standard library hasher may change between Rust releases.
pub fn owner_fingerprint(owner_id: &str) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    owner_id.hash(&mut hasher);
    hasher.finish()
}

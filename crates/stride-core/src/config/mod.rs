//! Producer-side runtime configuration.
//!
//! Values come from environment variables (see [`ClientConfig::from_env`]);
//! the CLI overrides individual fields from its flags.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::queue::RetryPolicy;
use crate::util::{is_http_url, non_blank};

const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8080";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Settings for the delivery client, retry queue, and scheduler
#[derive(Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Ingestion API base URL, without trailing slash
    pub api_base_url: String,
    /// Static bearer token forwarded on every request
    pub auth_token: Option<String>,
    pub connect_timeout: Duration,
    /// Upper bound for a whole delivery request, body included
    pub request_timeout: Duration,
    /// One backoff unit of the retry schedule
    pub retry_base_delay: Duration,
    /// Queue database location; `None` lets the caller pick a default
    pub queue_path: Option<PathBuf>,
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ClientConfig")
            .field("api_base_url", &self.api_base_url)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "[REDACTED]"))
            .field("connect_timeout", &self.connect_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("retry_base_delay", &self.retry_base_delay)
            .field("queue_path", &self.queue_path)
            .finish()
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            auth_token: None,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            retry_base_delay: Duration::from_secs(60),
            queue_path: None,
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let api_base_url = normalize_base_url(
            non_blank(lookup("STRIDE_API_BASE_URL"))
                .unwrap_or(defaults.api_base_url),
        )?;
        let auth_token = non_blank(lookup("STRIDE_API_TOKEN"));

        let connect_timeout = seconds_in_range(&lookup, "STRIDE_CONNECT_TIMEOUT_SECS", 10, 1..=120)?;
        let request_timeout =
            seconds_in_range(&lookup, "STRIDE_REQUEST_TIMEOUT_SECS", 30, 1..=600)?;
        if request_timeout < connect_timeout {
            return Err(ConfigError::Invalid(
                "STRIDE_REQUEST_TIMEOUT_SECS must be >= STRIDE_CONNECT_TIMEOUT_SECS".to_string(),
            ));
        }
        let retry_base_delay =
            seconds_in_range(&lookup, "STRIDE_RETRY_BASE_DELAY_SECS", 60, 1..=3_600)?;

        let queue_path = non_blank(lookup("STRIDE_QUEUE_PATH")).map(PathBuf::from);

        Ok(Self {
            api_base_url,
            auth_token,
            connect_timeout,
            request_timeout,
            retry_base_delay,
            queue_path,
        })
    }

    /// Retry policy with this config's backoff unit
    pub fn retry_policy(&self) -> RetryPolicy {
        let base = chrono::Duration::from_std(self.retry_base_delay)
            .unwrap_or_else(|_| chrono::Duration::minutes(1));
        RetryPolicy::default().with_base_delay(base)
    }
}

/// Validate and strip a trailing slash from an API base URL
pub fn normalize_base_url(raw: String) -> Result<String, ConfigError> {
    let value = non_blank(Some(raw))
        .ok_or_else(|| ConfigError::Invalid("STRIDE_API_BASE_URL must not be empty".to_string()))?;
    if !is_http_url(&value) {
        return Err(ConfigError::Invalid(
            "STRIDE_API_BASE_URL must start with http:// or https://".to_string(),
        ));
    }
    Ok(value.trim_end_matches('/').to_string())
}

fn seconds_in_range(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: u64,
    range: std::ops::RangeInclusive<u64>,
) -> Result<Duration, ConfigError> {
    let Some(raw) = non_blank(lookup(name)) else {
        return Ok(Duration::from_secs(default));
    };
    let secs = raw.parse::<u64>().map_err(|_| {
        ConfigError::Invalid(format!(
            "{name} must be an integer in [{}, {}]",
            range.start(),
            range.end()
        ))
    })?;
    if !range.contains(&secs) {
        return Err(ConfigError::Invalid(format!(
            "{name} must be in [{}, {}]",
            range.start(),
            range.end()
        )));
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> Result<ClientConfig, ConfigError> {
        let map: HashMap<&str, &str> = pairs.iter().copied().collect();
        ClientConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.retry_policy().max_retries, 5);
    }

    #[test]
    fn base_url_is_normalized() {
        let config = config_from(&[("STRIDE_API_BASE_URL", " https://api.example.com/ ")]).unwrap();
        assert_eq!(config.api_base_url, "https://api.example.com");

        let err = config_from(&[("STRIDE_API_BASE_URL", "api.example.com")]).unwrap_err();
        assert!(err.to_string().contains("http://"));
    }

    #[test]
    fn timeouts_are_range_checked() {
        assert!(config_from(&[("STRIDE_CONNECT_TIMEOUT_SECS", "0")]).is_err());
        assert!(config_from(&[("STRIDE_REQUEST_TIMEOUT_SECS", "abc")]).is_err());
        assert!(config_from(&[
            ("STRIDE_CONNECT_TIMEOUT_SECS", "20"),
            ("STRIDE_REQUEST_TIMEOUT_SECS", "5"),
        ])
        .is_err());
    }

    #[test]
    fn retry_base_delay_feeds_policy() {
        let config = config_from(&[("STRIDE_RETRY_BASE_DELAY_SECS", "3")]).unwrap();
        assert_eq!(
            config.retry_policy().backoff(2),
            chrono::Duration::seconds(12)
        );
    }

    #[test]
    fn debug_redacts_token() {
        let config = config_from(&[("STRIDE_API_TOKEN", "very-secret")]).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("very-secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}

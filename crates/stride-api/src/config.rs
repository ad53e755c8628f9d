use std::collections::HashMap;
use std::env;
use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::ingest::DEFAULT_MAX_BATCH_RECORDS;
use crate::routes::is_valid_owner_id;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    pub db_path: PathBuf,
    /// Static bearer token required on `/v1` routes when set
    pub api_token: Option<String>,
    /// Owners registered at startup
    pub seed_owners: Vec<String>,
    pub max_batch_records: usize,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("AppConfig")
            .field("bind_addr", &self.bind_addr)
            .field("db_path", &self.db_path)
            .field(
                "api_token",
                &self.api_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("seed_owners", &self.seed_owners.len())
            .field("max_batch_records", &self.max_batch_records)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "STRIDE_API_BIND_ADDR", "127.0.0.1:8080");
        let db_path = PathBuf::from(value_or_default(
            &lookup,
            "STRIDE_API_DB_PATH",
            "stride-api.db",
        ));
        let api_token = optional_trimmed(&lookup, "STRIDE_API_TOKEN");

        let seed_owners = optional_trimmed(&lookup, "STRIDE_API_SEED_OWNERS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|owner| !owner.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        if let Some(owner) = seed_owners.iter().find(|owner| !is_valid_owner_id(owner)) {
            return Err(ConfigError::Invalid(format!(
                "STRIDE_API_SEED_OWNERS contains an invalid owner id: {owner}"
            )));
        }

        let default_max = DEFAULT_MAX_BATCH_RECORDS.to_string();
        let max_batch_records =
            value_or_default(&lookup, "STRIDE_API_MAX_BATCH_RECORDS", &default_max)
                .parse::<usize>()
                .map_err(|_| {
                    ConfigError::Invalid(
                        "STRIDE_API_MAX_BATCH_RECORDS must be an integer in [1, 100000]"
                            .to_string(),
                    )
                })?;
        if !(1..=100_000).contains(&max_batch_records) {
            return Err(ConfigError::Invalid(
                "STRIDE_API_MAX_BATCH_RECORDS must be in [1, 100000]".to_string(),
            ));
        }

        Ok(Self {
            bind_addr,
            db_path,
            api_token,
            seed_owners,
            max_batch_records,
        })
    }
}

fn value_or_default(lookup: impl Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

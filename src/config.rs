//! Environment configuration.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use chat_contract::SENTINEL_ID;
use thiserror::Error;

pub const AGENT_ID_ENV_VAR: &str = "AGENT_CHAT_AGENT_ID";
pub const SERVER_URL_ENV_VAR: &str = "AGENT_CHAT_SERVER_URL";
pub const WORLD_ID_ENV_VAR: &str = "AGENT_CHAT_WORLD_ID";
pub const QUERY_ENV_VAR: &str = "AGENT_CHAT_QUERY";
pub const DATA_DIR_ENV_VAR: &str = "AGENT_CHAT_DATA_DIR";
pub const LOG_ENV_VAR: &str = "AGENT_CHAT_LOG";
pub const SEND_TIMEOUT_ENV_VAR: &str = "AGENT_CHAT_SEND_TIMEOUT_MS";
pub const HISTORY_LIMIT_ENV_VAR: &str = "AGENT_CHAT_HISTORY_LIMIT";
pub const PROVIDER_ENV_VAR: &str = "AGENT_CHAT_PROVIDER";

pub const DEFAULT_LOG_FILTER: &str = "info";
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_millis(30_000);
pub const DEFAULT_HISTORY_LIMIT: usize = 50;
pub const DEFAULT_PROVIDER_ID: &str = "live";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("{var} must be set")]
    Missing { var: &'static str },
    #[error("{var} must be a positive integer, got '{value}'")]
    InvalidNumber { var: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvConfig {
    pub agent_id: String,
    pub server_url: String,
    pub world_id: String,
    pub query: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub log_filter: String,
    pub send_timeout: Duration,
    pub history_limit: usize,
    pub provider: String,
}

impl EnvConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the config from an arbitrary variable source. Blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let value = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let agent_id = value(AGENT_ID_ENV_VAR).ok_or(ConfigError::Missing {
            var: AGENT_ID_ENV_VAR,
        })?;
        let server_url = value(SERVER_URL_ENV_VAR).ok_or(ConfigError::Missing {
            var: SERVER_URL_ENV_VAR,
        })?;

        let send_timeout = match value(SEND_TIMEOUT_ENV_VAR) {
            Some(raw) => Duration::from_millis(parse_positive(SEND_TIMEOUT_ENV_VAR, &raw)?),
            None => DEFAULT_SEND_TIMEOUT,
        };
        let history_limit = match value(HISTORY_LIMIT_ENV_VAR) {
            Some(raw) => usize::try_from(parse_positive(HISTORY_LIMIT_ENV_VAR, &raw)?).map_err(
                |_| ConfigError::InvalidNumber {
                    var: HISTORY_LIMIT_ENV_VAR,
                    value: raw.clone(),
                },
            )?,
            None => DEFAULT_HISTORY_LIMIT,
        };

        Ok(Self {
            agent_id,
            server_url,
            world_id: value(WORLD_ID_ENV_VAR).unwrap_or_else(|| SENTINEL_ID.to_string()),
            query: lookup(QUERY_ENV_VAR).filter(|query| !query.trim().is_empty()),
            data_dir: value(DATA_DIR_ENV_VAR).map(PathBuf::from),
            log_filter: value(LOG_ENV_VAR).unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
            send_timeout,
            history_limit,
            provider: value(PROVIDER_ENV_VAR).unwrap_or_else(|| DEFAULT_PROVIDER_ID.to_string()),
        })
    }
}

fn parse_positive(var: &'static str, raw: &str) -> Result<u64, ConfigError> {
    match raw.parse::<u64>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(ConfigError::InvalidNumber {
            var,
            value: raw.to_string(),
        }),
    }
}

use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    pub chain_api_url: String,
    /// Absent disables outbound status sync entirely.
    pub registry_api_url: Option<String>,
    pub poll_interval_ms: u64,
    /// Backoff after a transient fetch failure is this multiple of the
    /// poll interval.
    pub error_backoff_multiplier: u32,
    pub settlement_max_retries: i64,
    pub retry_interval_ms: u64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = parse_with_default(&env_map, "PORT", 8080u16)?;

        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let chain_api_url = env_map
            .get("CHAIN_API_URL")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("CHAIN_API_URL".to_string()))?;

        let registry_api_url = env_map.get("REGISTRY_API_URL").cloned();

        let poll_interval_ms = parse_with_default(&env_map, "POLL_INTERVAL_MS", 5000u64)?;
        let error_backoff_multiplier =
            parse_with_default(&env_map, "ERROR_BACKOFF_MULTIPLIER", 5u32)?;
        let settlement_max_retries =
            parse_with_default(&env_map, "SETTLEMENT_MAX_RETRIES", 3i64)?;
        let retry_interval_ms = parse_with_default(&env_map, "RETRY_INTERVAL_MS", 60_000u64)?;

        if poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "POLL_INTERVAL_MS".to_string(),
                "must be greater than zero".to_string(),
            ));
        }
        if error_backoff_multiplier == 0 {
            return Err(ConfigError::InvalidValue(
                "ERROR_BACKOFF_MULTIPLIER".to_string(),
                "must be greater than zero".to_string(),
            ));
        }

        Ok(Config {
            port,
            database_path,
            chain_api_url,
            registry_api_url,
            poll_interval_ms,
            error_backoff_multiplier,
            settlement_max_retries,
            retry_interval_ms,
        })
    }
}

fn parse_with_default<T: std::str::FromStr>(
    env_map: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match env_map.get(key) {
        Some(raw) => raw.parse::<T>().map_err(|_| {
            ConfigError::InvalidValue(
                key.to_string(),
                format!("could not parse {:?}", raw),
            )
        }),
        None => Ok(default),
    }
}

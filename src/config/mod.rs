use anyhow::{anyhow, Context, Result};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::{env, str::FromStr, time::Duration};
use validator::{Validate, ValidationError};

use crate::provider::{ankr::ANKR_MULTICHAIN_URL, DEFAULT_BLOCKCHAIN};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Config {
    // Provider
    #[validate(custom = "validate_api_url")]
    pub api_url: String,
    pub api_key: Option<String>,
    #[validate(length(min = 1, max = 32))]
    pub blockchain: String,
    #[validate(range(min = 1, max = 600))]
    pub request_timeout_secs: Option<u64>,

    // Runtime
    #[validate(custom = "validate_log_level")]
    pub log_level: String,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: ANKR_MULTICHAIN_URL.to_string(),
            api_key: None,
            blockchain: DEFAULT_BLOCKCHAIN.to_string(),
            request_timeout_secs: None,
            log_level: "info".to_string(),
            metrics_port: None,
        }
    }
}

impl Config {
    /// Reads `ANKR_API_URL`, `ANKR_API_KEY`, `BLOCKCHAIN`, `REQUEST_TIMEOUT_SECS`,
    /// `LOG_LEVEL` and `METRICS_PORT`, falling back to defaults for unset ones.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            api_url: env::var("ANKR_API_URL").unwrap_or(defaults.api_url),
            api_key: env::var("ANKR_API_KEY").ok().filter(|key| !key.is_empty()),
            blockchain: env::var("BLOCKCHAIN").unwrap_or(defaults.blockchain),
            request_timeout_secs: parse_optional("REQUEST_TIMEOUT_SECS")?,
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            metrics_port: parse_optional("METRICS_PORT")?,
        })
    }

    pub fn validate_all(&self) -> Result<()> {
        if let Err(e) = self.validate() {
            return Err(anyhow!("Configuration validation failed: {:?}", e));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    pub fn level_filter(&self) -> Result<LevelFilter> {
        LevelFilter::from_str(&self.log_level)
            .map_err(|_| anyhow!("Unknown log level: {}", self.log_level))
    }
}

fn parse_optional<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("{} is not a valid value: {}", key, value)),
        _ => Ok(None),
    }
}

// Custom validators
fn validate_api_url(api_url: &str) -> Result<(), ValidationError> {
    match url::Url::parse(api_url) {
        Ok(parsed) if parsed.scheme() == "http" || parsed.scheme() == "https" => Ok(()),
        _ => Err(ValidationError::new("invalid_api_url")),
    }
}

fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    if LevelFilter::from_str(level).is_err() {
        return Err(ValidationError::new("invalid_log_level"));
    }
    Ok(())
}

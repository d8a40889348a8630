//! Configuration - Type-safe, validated config

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::core::{Error, Result};

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Exchange configurations
    #[serde(default)]
    pub exchanges: Vec<ExchangeConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// Exchange ID (bitfinex, bittrex)
    pub id: String,

    /// API key (loaded from env if not provided)
    #[serde(default)]
    pub api_key: Option<String>,

    /// API secret (loaded from env if not provided)
    #[serde(default)]
    pub api_secret: Option<String>,

    /// Overrides the exchange's REST root
    #[serde(default)]
    pub base_url: Option<String>,

    /// Per-request timeout
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    10_000
}

impl ExchangeConfig {
    /// Public-only config with defaults
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            api_key: None,
            api_secret: None,
            base_url: None,
            timeout_ms: default_timeout_ms(),
        }
    }

    /// Reads `<ID>_API_KEY`, `<ID>_API_SECRET` and `<ID>_BASE_URL`,
    /// after loading `.env` if one exists.
    pub fn from_env(id: &str) -> Result<Self> {
        dotenv::dotenv().ok();
        let prefix = id.to_uppercase();
        let var = |suffix: &str| {
            std::env::var(format!("{}_{}", prefix, suffix))
                .ok()
                .filter(|v| !v.is_empty())
        };

        let config = Self {
            api_key: var("API_KEY"),
            api_secret: var("API_SECRET"),
            base_url: var("BASE_URL"),
            ..Self::new(id.to_lowercase())
        };
        config.credentials()?;
        Ok(config)
    }

    /// Both halves of the credential pair, or neither
    pub fn credentials(&self) -> Result<Option<(&str, &str)>> {
        match (self.api_key.as_deref(), self.api_secret.as_deref()) {
            (Some(key), Some(secret)) => Ok(Some((key, secret))),
            (None, None) => Ok(None),
            (Some(_), None) => Err(Error::Config(format!(
                "{}: must provide API secret",
                self.id
            ))),
            (None, Some(_)) => Err(Error::Config(format!("{}: must provide API key", self.id))),
        }
    }
}

impl Config {
    /// Load from TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?;

        Self::parse(&content)
    }

    /// Parse TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;

        for exchange in &config.exchanges {
            exchange.credentials()?;
        }
        Ok(config)
    }

    /// Get exchange config by ID
    pub fn exchange(&self, id: &str) -> Option<&ExchangeConfig> {
        self.exchanges.iter().find(|e| e.id.eq_ignore_ascii_case(id))
    }
}

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Base URL of the swap provider API
    pub provider_url: String,

    /// Address of the device bridge
    pub device_addr: String,

    /// Postgres URL for swap history; in-memory history when unset
    pub database_url: Option<String>,

    /// Name of the device application that signs swaps
    pub exchange_app_name: String,

    pub quote_timeout_ms: u64,

    pub device_open_timeout_ms: u64,

    /// Ceiling for a single device interaction, including the user
    /// reviewing the swap on screen
    pub device_interaction_timeout_ms: u64,

    pub broadcast_timeout_ms: u64,

    /// Tickers the buy flow can fund
    pub buy_supported_currencies: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            provider_url: "https://swap.example.com/v1".to_string(),
            device_addr: "127.0.0.1:9999".to_string(),
            database_url: None,
            exchange_app_name: "Exchange".to_string(),
            quote_timeout_ms: 10_000,
            device_open_timeout_ms: 30_000,
            device_interaction_timeout_ms: 10 * 60 * 1000,
            broadcast_timeout_ms: 60_000,
            buy_supported_currencies: vec!["BTC".to_string(), "ETH".to_string()],
        }
    }
}

impl AppConfig {
    /// Loads configuration from `SWAP_*` environment variables
    pub fn from_env() -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(
                config::Environment::with_prefix("SWAP")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("buy_supported_currencies"),
            )
            .build()
            .context("Failed to read configuration from environment")?;

        settings
            .try_deserialize()
            .context("Invalid swap configuration")
    }

    pub fn quote_timeout(&self) -> Duration {
        Duration::from_millis(self.quote_timeout_ms)
    }

    pub fn device_open_timeout(&self) -> Duration {
        Duration::from_millis(self.device_open_timeout_ms)
    }

    pub fn device_interaction_timeout(&self) -> Duration {
        Duration::from_millis(self.device_interaction_timeout_ms)
    }

    pub fn broadcast_timeout(&self) -> Duration {
        Duration::from_millis(self.broadcast_timeout_ms)
    }

    pub fn buy_supported(&self) -> HashSet<String> {
        self.buy_supported_currencies
            .iter()
            .map(|ticker| ticker.trim().to_uppercase())
            .filter(|ticker| !ticker.is_empty())
            .collect()
    }
}

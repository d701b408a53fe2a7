//! JSON trading configuration loading

use crate::instrument::TickerInfo;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;
use tracing::info;

/// Configuration loading failures, terminal at startup
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path that was attempted
        path: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid JSON or has the wrong shape
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// Path that was attempted
        path: String,
        /// Underlying parse error
        #[source]
        source: serde_json::Error,
    },
    /// The `binance` section is absent
    #[error("config file {path} is missing the `binance` section")]
    MissingSection {
        /// Path that was attempted
        path: String,
    },
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    binance: Option<TradingConfig>,
}

/// Order-gateway tuning knobs
#[derive(Debug, Clone, Deserialize)]
pub struct OrderGatewayConfig {
    /// Engine client id the gateway answers for
    #[serde(default = "default_client_id")]
    pub client_id: u32,
    /// User-data stream reconnect budget
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Sustained REST request rate
    #[serde(default = "default_rate_limit_per_sec")]
    pub rate_limit_per_sec: f64,
    /// REST request burst allowance
    #[serde(default = "default_rate_burst")]
    pub rate_burst: u32,
}

impl Default for OrderGatewayConfig {
    fn default() -> Self {
        Self {
            client_id: default_client_id(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            rate_limit_per_sec: default_rate_limit_per_sec(),
            rate_burst: default_rate_burst(),
        }
    }
}

fn default_client_id() -> u32 {
    1
}
fn default_max_reconnect_attempts() -> u32 {
    5
}
fn default_rate_limit_per_sec() -> f64 {
    10.0
}
fn default_rate_burst() -> u32 {
    20
}

/// Cache TTL settings
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    /// Exchange-info cache TTL in minutes
    #[serde(default = "default_symbol_info_cache_minutes")]
    pub symbol_info_cache_minutes: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            symbol_info_cache_minutes: default_symbol_info_cache_minutes(),
        }
    }
}

fn default_symbol_info_cache_minutes() -> u64 {
    60
}

/// The `binance` section of the trading configuration file
#[derive(Debug, Clone, Deserialize)]
pub struct TradingConfig {
    /// Route to the exchange testnet instead of production
    #[serde(default)]
    pub use_testnet: bool,
    /// Configured instruments
    pub tickers: Vec<TickerInfo>,
    /// Gateway tuning
    #[serde(default)]
    pub order_gateway: OrderGatewayConfig,
    /// Cache TTLs
    #[serde(default)]
    pub cache_settings: CacheSettings,
}

impl TradingConfig {
    /// Load and validate the configuration from a JSON file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: display.clone(),
            source,
        })?;
        let file: ConfigFile =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: display.clone(),
                source,
            })?;
        let config = file
            .binance
            .ok_or(ConfigError::MissingSection { path: display })?;
        info!(
            tickers = config.tickers.len(),
            use_testnet = config.use_testnet,
            "loaded trading configuration"
        );
        Ok(config)
    }
}

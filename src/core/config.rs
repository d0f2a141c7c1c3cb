//! Configuration - Type-safe, validated config
//!
//! Loads from `bridge.toml`. Every field has a default, so a partial file (or
//! no file at all) is valid.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::core::{Error, Result};

/// Top-level config file structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Facade behaviour
    #[serde(default)]
    pub market: MarketConfig,

    /// Simulated broker used by the demo binary
    #[serde(default)]
    pub sim: SimConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfig {
    /// Upper bound between re-checks of order status and streaming caches
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Streaming entries older than this are reported stale
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,

    /// Pause between failed login attempts
    #[serde(default)]
    pub login_retry_delay_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_stale_after_secs() -> u64 {
    10
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            stale_after_secs: default_stale_after_secs(),
            login_retry_delay_ms: 0,
        }
    }
}

impl MarketConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn login_retry_delay(&self) -> Duration {
        Duration::from_millis(self.login_retry_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    /// Milliseconds between market ticks
    #[serde(default = "default_change_interval_ms")]
    pub change_interval_ms: u64,

    /// Prices move in multiples of this unit
    #[serde(default = "default_price_unit")]
    pub price_unit: i64,

    /// Largest price move per tick
    #[serde(default = "default_max_price_change")]
    pub max_price_change: i64,

    /// Largest quote size move per tick
    #[serde(default = "default_max_quote_change")]
    pub max_quote_change: i64,

    /// Starting price range, inclusive
    #[serde(default = "default_start_price_range")]
    pub start_price_range: (i64, i64),

    /// Prices never fall below this
    #[serde(default = "default_min_price")]
    pub min_price: i64,

    /// Starting quote size range, inclusive
    #[serde(default = "default_start_quote_size_range")]
    pub start_quote_size_range: (u64, u64),

    /// Starting cash
    #[serde(default = "default_start_deposit")]
    pub start_deposit: i64,

    /// Instruments the simulated market lists
    #[serde(default = "default_universe")]
    pub universe: Vec<String>,

    /// Fixed RNG seed; random when absent
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_change_interval_ms() -> u64 {
    100
}
fn default_price_unit() -> i64 {
    5
}
fn default_max_price_change() -> i64 {
    50
}
fn default_max_quote_change() -> i64 {
    10
}
fn default_start_price_range() -> (i64, i64) {
    (1000, 2500)
}
fn default_min_price() -> i64 {
    1000
}
fn default_start_quote_size_range() -> (u64, u64) {
    (0, 100)
}
fn default_start_deposit() -> i64 {
    10_000_000
}
fn default_universe() -> Vec<String> {
    ["005930", "000660", "035420", "035720", "051910", "068270"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            change_interval_ms: default_change_interval_ms(),
            price_unit: default_price_unit(),
            max_price_change: default_max_price_change(),
            max_quote_change: default_max_quote_change(),
            start_price_range: default_start_price_range(),
            min_price: default_min_price(),
            start_quote_size_range: default_start_quote_size_range(),
            start_deposit: default_start_deposit(),
            universe: default_universe(),
            seed: None,
        }
    }
}

impl SimConfig {
    pub fn change_interval(&self) -> Duration {
        Duration::from_millis(self.change_interval_ms)
    }
}

impl BridgeConfig {
    /// Load from TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?;

        let config: BridgeConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `MARKET_BRIDGE_CONFIG`, then `bridge.toml` in the working
    /// directory, then the crate root; defaults when none parse.
    pub fn load_default() -> Self {
        let mut candidates = Vec::new();
        if let Ok(path) = std::env::var("MARKET_BRIDGE_CONFIG") {
            candidates.push(path);
        }
        candidates.push("bridge.toml".to_string());
        candidates.push(concat!(env!("CARGO_MANIFEST_DIR"), "/bridge.toml").to_string());

        for path in &candidates {
            match Self::load(Path::new(path)) {
                Ok(cfg) => {
                    tracing::info!("Loaded config from {}", path);
                    return cfg;
                }
                Err(e) => tracing::debug!("Skipping {}: {}", path, e),
            }
        }

        tracing::warn!("No bridge.toml found, using defaults");
        Self::default()
    }

    fn validate(&self) -> Result<()> {
        if self.market.poll_interval_ms == 0 {
            return Err(Error::Config("market.poll_interval_ms must be positive".into()));
        }
        let sim = &self.sim;
        if sim.price_unit <= 0 {
            return Err(Error::Config("sim.price_unit must be positive".into()));
        }
        if sim.start_price_range.0 > sim.start_price_range.1 {
            return Err(Error::Config("sim.start_price_range is empty".into()));
        }
        if sim.start_quote_size_range.0 > sim.start_quote_size_range.1 {
            return Err(Error::Config("sim.start_quote_size_range is empty".into()));
        }
        if sim.universe.is_empty() {
            return Err(Error::Config("sim.universe must list at least one instrument".into()));
        }
        Ok(())
    }
}

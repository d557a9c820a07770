use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

use crate::errors::CoreError;

use super::asset::AssetType;

/// Environment variables with this prefix override file settings, e.g.
/// `PORTFOLIO_RISK_RISK_FREE_RATE=0.03` or `PORTFOLIO_RISK_CACHE__LIVE_TTL_SECS=60`.
pub const ENV_PREFIX: &str = "PORTFOLIO_RISK";

/// Longest history window that can be requested (10 years).
pub const MAX_LOOKBACK_DAYS: i64 = 3650;

/// Runtime configuration. Every field has a default, so an empty file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Annual risk-free rate used by the Sharpe ratio (0.02 = 2%)
    #[serde(default = "default_risk_free_rate")]
    pub risk_free_rate: f64,

    /// Market index the portfolio beta is measured against
    #[serde(default = "default_benchmark_symbol")]
    pub benchmark_symbol: String,

    /// How many calendar days of history feed the value history and risk metrics
    #[serde(default = "default_lookback_days")]
    pub lookback_days: i64,

    #[serde(default)]
    pub cache: CacheConfig,

    /// Target allocation (percent) per asset type used for rebalancing suggestions
    #[serde(default = "default_target_allocation")]
    pub target_allocation: BTreeMap<AssetType, f64>,

    /// Minimum drift (percentage points) before a rebalancing suggestion is made
    #[serde(default = "default_rebalance_threshold_pct")]
    pub rebalance_threshold_pct: f64,

    /// Optional API keys for providers that require them (e.g., "alphavantage").
    #[serde(default)]
    pub api_keys: HashMap<String, String>,
}

/// Quote cache tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL for ranges that end today or later
    #[serde(default = "default_live_ttl_secs")]
    pub live_ttl_secs: u64,

    /// TTL for ranges that end in the past
    #[serde(default = "default_historical_ttl_secs")]
    pub historical_ttl_secs: u64,

    /// Upper bound for one upstream source; a chain of N sources gets N times this
    #[serde(default = "default_provider_timeout_secs")]
    pub provider_timeout_secs: u64,

    /// Provider attempts per cache refresh (1 = no retry)
    #[serde(default = "default_fetch_attempts")]
    pub fetch_attempts: u32,

    /// Delay before the first retry; doubles on each further retry
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Entries older than this are dropped, even as a stale fallback.
    /// Rolling `[today - lookback, today]` windows produce a new key every day,
    /// so without this the cache only grows.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
}

fn default_risk_free_rate() -> f64 {
    0.02
}

fn default_benchmark_symbol() -> String {
    "^GSPC".to_string()
}

fn default_lookback_days() -> i64 {
    365
}

fn default_target_allocation() -> BTreeMap<AssetType, f64> {
    BTreeMap::from([
        (AssetType::Stock, 60.0),
        (AssetType::Bond, 30.0),
        (AssetType::Etf, 10.0),
    ])
}

fn default_rebalance_threshold_pct() -> f64 {
    5.0
}

fn default_live_ttl_secs() -> u64 {
    15 * 60
}

fn default_historical_ttl_secs() -> u64 {
    24 * 60 * 60
}

fn default_provider_timeout_secs() -> u64 {
    5
}

fn default_fetch_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_retention_secs() -> u64 {
    7 * 24 * 60 * 60
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            risk_free_rate: default_risk_free_rate(),
            benchmark_symbol: default_benchmark_symbol(),
            lookback_days: default_lookback_days(),
            cache: CacheConfig::default(),
            target_allocation: default_target_allocation(),
            rebalance_threshold_pct: default_rebalance_threshold_pct(),
            api_keys: HashMap::new(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            live_ttl_secs: default_live_ttl_secs(),
            historical_ttl_secs: default_historical_ttl_secs(),
            provider_timeout_secs: default_provider_timeout_secs(),
            fetch_attempts: default_fetch_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            retention_secs: default_retention_secs(),
        }
    }
}

impl CacheConfig {
    pub fn live_ttl(&self) -> Duration {
        Duration::from_secs(self.live_ttl_secs)
    }

    pub fn historical_ttl(&self) -> Duration {
        Duration::from_secs(self.historical_ttl_secs)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

impl Settings {
    /// Load settings from a TOML file, then apply `PORTFOLIO_RISK_*` environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, CoreError> {
        let settings: Settings = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from a TOML string (no environment overrides).
    pub fn from_toml_str(toml: &str) -> Result<Self, CoreError> {
        let settings: Settings = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values the services cannot work with.
    pub fn validate(&self) -> Result<(), CoreError> {
        if !self.risk_free_rate.is_finite() || self.risk_free_rate.abs() > 1.0 {
            return Err(CoreError::Config(
                "risk_free_rate must be a finite fraction between -1 and 1".into(),
            ));
        }

        if self.benchmark_symbol.trim().is_empty() {
            return Err(CoreError::Config("benchmark_symbol must not be empty".into()));
        }

        if self.lookback_days < 2 || self.lookback_days > MAX_LOOKBACK_DAYS {
            return Err(CoreError::Config(format!(
                "lookback_days must be between 2 and {MAX_LOOKBACK_DAYS}"
            )));
        }

        if self.cache.live_ttl_secs == 0 || self.cache.historical_ttl_secs == 0 {
            return Err(CoreError::Config("cache TTLs must be greater than 0".into()));
        }

        if self.cache.provider_timeout_secs == 0 {
            return Err(CoreError::Config(
                "cache.provider_timeout_secs must be greater than 0".into(),
            ));
        }

        if self.cache.retention_secs < self.cache.live_ttl_secs.max(self.cache.historical_ttl_secs) {
            return Err(CoreError::Config(
                "cache.retention_secs must be at least as long as both cache TTLs".into(),
            ));
        }

        if self.cache.fetch_attempts == 0 {
            return Err(CoreError::Config("cache.fetch_attempts must be at least 1".into()));
        }

        if self
            .target_allocation
            .values()
            .any(|pct| !pct.is_finite() || *pct < 0.0 || *pct > 100.0)
        {
            return Err(CoreError::Config(
                "target_allocation percentages must be between 0 and 100".into(),
            ));
        }

        let total: f64 = self.target_allocation.values().sum();
        if total > 100.0 + 1e-9 {
            return Err(CoreError::Config(format!(
                "target_allocation sums to {total}%, must not exceed 100%"
            )));
        }

        if !self.rebalance_threshold_pct.is_finite() || self.rebalance_threshold_pct < 0.0 {
            return Err(CoreError::Config(
                "rebalance_threshold_pct must be non-negative".into(),
            ));
        }

        Ok(())
    }
}

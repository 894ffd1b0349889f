//! Configuration file parser for `hubbub.toml`.
//!
//! The config file is optional — a missing file yields `Config::default()`.
//! Unknown keys are silently ignored by serde, though we log a warning when
//! the file contains potential typos.
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds the maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

const MAX_CONFIG_BYTES: u64 = 1024 * 1024;

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// Missing keys fall back to `Default::default()`.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the ingress HTTP server binds to.
    pub bind_addr: String,

    /// Path to the SQLite database file (":memory:" for an ephemeral store).
    pub database_path: String,

    /// Shared secret checked against the `X-Hub-Operator-Secret` header on
    /// operator-only `/work/*` endpoints.
    pub operator_secret: Option<String>,

    /// When true, `/work/*` endpoints are permitted without a secret header
    /// (local development only — never set in production).
    pub dev_mode: bool,

    pub lease: LeaseConfig,
    pub subscription: SubscriptionConfig,
    pub feed_pull: FeedPullConfig,
    pub delivery: DeliveryConfig,
    pub bootstrap: BootstrapConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8000".to_string(),
            database_path: "hubbub.db".to_string(),
            operator_secret: None,
            dev_mode: false,
            lease: LeaseConfig::default(),
            subscription: SubscriptionConfig::default(),
            feed_pull: FeedPullConfig::default(),
            delivery: DeliveryConfig::default(),
            bootstrap: BootstrapConfig::default(),
        }
    }
}

/// Tunables for the `query-and-own` lease dispatcher.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct LeaseConfig {
    pub lease_seconds: i64,
    pub sample_ratio: usize,
    pub lock_ratio: usize,
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            lease_seconds: 15,
            sample_ratio: 20,
            lock_ratio: 4,
        }
    }
}

/// Tunables for the subscription confirmation state machine.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    pub retry_period_seconds: i64,
    pub expiration_seconds: i64,
    pub max_confirm_failures: u32,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            retry_period_seconds: 300,
            expiration_seconds: 90 * 24 * 3600,
            max_confirm_failures: 10,
        }
    }
}

/// Tunables for the feed-pull worker.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct FeedPullConfig {
    pub retry_period_seconds: i64,
    pub max_fetch_failures: u32,
}

impl Default for FeedPullConfig {
    fn default() -> Self {
        Self {
            retry_period_seconds: 300,
            max_fetch_failures: 9,
        }
    }
}

/// Tunables for the push-delivery worker.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub chunk_size: usize,
    pub retry_period_seconds: i64,
    pub max_delivery_failures: u32,
    pub deadline_seconds: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            chunk_size: 10,
            retry_period_seconds: 60,
            max_delivery_failures: 8,
            deadline_seconds: 20,
        }
    }
}

/// Tunables for the bootstrap poller.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    pub period_seconds: i64,
    pub feed_chunk_size: usize,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            period_seconds: 3 * 3600,
            feed_chunk_size: 200,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let metadata = std::fs::metadata(path)?;
        if metadata.len() > MAX_CONFIG_BYTES {
            return Err(ConfigError::TooLarge(format!(
                "{} bytes exceeds {} byte limit",
                metadata.len(),
                MAX_CONFIG_BYTES
            )));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }
}

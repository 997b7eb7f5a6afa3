//! Configuration structures.
//!
//! Configuration is loaded from TOML files and environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::errors::{Error, Result};

/// Client configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Relay URLs (`ws://` or `wss://`).
    #[serde(default)]
    pub relays: Vec<String>,

    /// Hex public key of the Mostro coordinator.
    #[serde(default)]
    pub mostro_pubkey: String,

    /// Request and waiter timeouts.
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Gift wrap envelope parameters.
    #[serde(default)]
    pub envelope: EnvelopeConfig,

    /// Subscription filter parameters.
    #[serde(default)]
    pub subscriptions: SubscriptionConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Request/reply timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// How long a correlated request waits for its reply.
    #[serde(with = "humantime_serde")]
    pub request: Duration,

    /// Default window for `wait_for_action`.
    #[serde(with = "humantime_serde")]
    pub action_wait: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request: Duration::from_secs(30),
            action_wait: Duration::from_secs(60),
        }
    }
}

/// Gift wrap configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvelopeConfig {
    /// Upper bound of the random backdating applied to seal and wrap timestamps.
    #[serde(with = "humantime_serde")]
    pub gift_wrap_time_window: Duration,
}

impl Default for EnvelopeConfig {
    fn default() -> Self {
        Self {
            gift_wrap_time_window: Duration::from_secs(2 * 24 * 60 * 60),
        }
    }
}

/// Subscription configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    /// How far back the initial query reaches.
    #[serde(with = "humantime_serde")]
    pub event_interest_window: Duration,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            event_interest_window: Duration::from_secs(14 * 24 * 60 * 60),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl Config {
    /// Parse a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| Error::config(format!("failed to parse config: {}", e)))
    }

    /// Load a TOML config file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("failed to read config file: {}", e)))?;
        Self::from_toml_str(&raw)
    }

    /// Override fields from `MOSTRO_RELAYS` (comma separated) and `MOSTRO_PUBKEY`.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(relays) = std::env::var("MOSTRO_RELAYS") {
            self.relays = relays
                .split(',')
                .map(|r| r.trim().to_string())
                .filter(|r| !r.is_empty())
                .collect();
        }
        if let Ok(pubkey) = std::env::var("MOSTRO_PUBKEY") {
            self.mostro_pubkey = pubkey;
        }
        if let Ok(level) = std::env::var("RUST_LOG") {
            self.observability.log_level = level;
        }
    }

    /// Relay URLs with a websocket scheme. Anything else is skipped with a warning.
    pub fn valid_relays(&self) -> Vec<String> {
        self.relays
            .iter()
            .filter(|relay| {
                let ok = relay.starts_with("ws://") || relay.starts_with("wss://");
                if !ok {
                    tracing::warn!("invalid relay url skipped: {:?}", relay);
                }
                ok
            })
            .cloned()
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        crate::validation::validate_non_empty(&self.mostro_pubkey, "mostro_pubkey")
            .map_err(|e| Error::config(e.to_string()))?;
        crate::nostr::PublicKey::from_hex(&self.mostro_pubkey)
            .map_err(|e| Error::config(format!("mostro_pubkey: {}", e)))?;
        if self.timeouts.request.is_zero() {
            return Err(Error::config("request timeout cannot be zero"));
        }
        if self.timeouts.action_wait.is_zero() {
            return Err(Error::config("action wait timeout cannot be zero"));
        }
        Ok(())
    }
}

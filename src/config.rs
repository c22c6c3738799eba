//! # Configuration
//!
//! Serde-backed configuration for the dispatch core with explicit defaults
//! and validation. Loaded through layered sources: built-in defaults, an
//! optional `relay` config file in the working directory, then
//! `RELAY_`-prefixed environment variable overrides (e.g.
//! `RELAY_TRANSPORT__POLL_WAIT_MS=250`).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::dispatch::EventDispatchPolicy;

/// Configuration loading or validation failure.
#[derive(Error, Debug)]
pub enum ConfigurationError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {field}: {reason}")]
    Invalid { field: String, reason: String },
}

impl ConfigurationError {
    fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Top-level configuration for the dispatch core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub outbox: OutboxConfig,
    #[serde(default)]
    pub transport: TransportConfig,
}

impl RelayConfig {
    /// Load configuration from defaults, an optional `relay` file and
    /// `RELAY_`-prefixed environment overrides.
    pub fn load() -> Result<Self, ConfigurationError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("relay").required(false))
            .add_source(config::Environment::with_prefix("RELAY").separator("__"))
            .build()?;

        let loaded: Self = settings.try_deserialize()?;
        loaded.validate()?;
        debug!(?loaded, "Configuration loaded");
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.outbox.validate()?;
        self.transport.validate()
    }
}

/// Dispatch pipeline configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Fan-out discipline for one event across multiple handlers.
    #[serde(default)]
    pub event_dispatch_policy: EventDispatchPolicy,
}

/// Outbox commit configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxConfig {
    /// Maximum pending entries replayed per commit cycle; the remainder is
    /// picked up by the next commit.
    #[serde(default = "default_max_replay_batch")]
    pub max_replay_batch: usize,
}

fn default_max_replay_batch() -> usize {
    100
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            max_replay_batch: default_max_replay_batch(),
        }
    }
}

impl OutboxConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.max_replay_batch == 0 {
            return Err(ConfigurationError::invalid(
                "outbox.max_replay_batch",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Polling transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Bounded wait per receive call, in milliseconds.
    #[serde(default = "default_poll_wait_ms")]
    pub poll_wait_ms: u64,

    /// Fixed backoff after a transient receive error, in milliseconds.
    #[serde(default = "default_receive_backoff_ms")]
    pub receive_backoff_ms: u64,

    /// Grace period to drain an unsubscribing poll loop before it is
    /// hard-cancelled, in milliseconds.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,

    /// Visibility timeout applied to received messages, in seconds.
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,

    /// Optional cap on receive batch size, below the backend's own limit.
    #[serde(default)]
    pub max_batch_size: Option<usize>,

    /// Delivery attempts before a failing message is dropped. Used when a
    /// subscription carries no retry policy of its own.
    #[serde(default = "default_max_delivery_attempts")]
    pub default_max_delivery_attempts: u32,

    /// Base delay for the default redelivery backoff, in milliseconds.
    #[serde(default = "default_redelivery_delay_ms")]
    pub redelivery_delay_ms: u64,
}

fn default_poll_wait_ms() -> u64 {
    1_000
}

fn default_receive_backoff_ms() -> u64 {
    1_000
}

fn default_drain_timeout_ms() -> u64 {
    5_000
}

fn default_visibility_timeout_secs() -> u64 {
    30
}

fn default_max_delivery_attempts() -> u32 {
    3
}

fn default_redelivery_delay_ms() -> u64 {
    1_000
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            poll_wait_ms: default_poll_wait_ms(),
            receive_backoff_ms: default_receive_backoff_ms(),
            drain_timeout_ms: default_drain_timeout_ms(),
            visibility_timeout_secs: default_visibility_timeout_secs(),
            max_batch_size: None,
            default_max_delivery_attempts: default_max_delivery_attempts(),
            redelivery_delay_ms: default_redelivery_delay_ms(),
        }
    }
}

impl TransportConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.default_max_delivery_attempts == 0 {
            return Err(ConfigurationError::invalid(
                "transport.default_max_delivery_attempts",
                "must be at least 1",
            ));
        }
        if self.drain_timeout_ms == 0 {
            return Err(ConfigurationError::invalid(
                "transport.drain_timeout_ms",
                "must be greater than zero",
            ));
        }
        if self.max_batch_size == Some(0) {
            return Err(ConfigurationError::invalid(
                "transport.max_batch_size",
                "must be at least 1 when set",
            ));
        }
        Ok(())
    }

    pub fn poll_wait(&self) -> Duration {
        Duration::from_millis(self.poll_wait_ms)
    }

    pub fn receive_backoff(&self) -> Duration {
        Duration::from_millis(self.receive_backoff_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }

    pub fn redelivery_delay(&self) -> Duration {
        Duration::from_millis(self.redelivery_delay_ms)
    }
}

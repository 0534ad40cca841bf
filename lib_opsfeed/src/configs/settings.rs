//! # Sync Settings
//!
//! Tunables for the synchronization client: reconnect cadence, attempt cap,
//! throttle window, and the memory bounds of the dedup ledger and transfer log.
//! Durations travel as integer milliseconds on the wire so config files stay
//! readable (`"reconnect_interval_ms": 3000`).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised when a settings value cannot drive the client.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SettingsError {
    /// A numeric field was zero where at least one unit is required.
    #[error("setting `{0}` must be greater than zero")]
    MustBePositive(&'static str),
}

/// Runtime configuration of the sync client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Fixed delay between reconnection attempts.
    #[serde(rename = "reconnect_interval_ms", with = "duration_ms")]
    pub reconnect_interval: Duration,
    /// Consecutive failed connections tolerated before giving up.
    pub max_reconnect_attempts: u32,
    /// Minimum spacing between two applied metric updates for one entity.
    #[serde(rename = "throttle_window_ms", with = "duration_ms")]
    pub throttle_window: Duration,
    /// Maximum number of event ids remembered by the dedup ledger.
    pub dedup_capacity: usize,
    /// How long an admitted event id stays in the ledger. `None` keeps ids until
    /// capacity eviction.
    #[serde(rename = "dedup_ttl_ms", with = "option_duration_ms")]
    pub dedup_ttl: Option<Duration>,
    /// Maximum number of transfer events kept in the cache (oldest evicted first).
    pub max_transfer_events: usize,
    /// Inactivity watchdog for socket transports. `None` disables it.
    #[serde(rename = "idle_timeout_ms", with = "option_duration_ms")]
    pub idle_timeout: Option<Duration>,
    /// Longest a socket handshake may take before the attempt counts as
    /// failed. `None` waits for the operating system to give up.
    #[serde(rename = "connect_timeout_ms", with = "option_duration_ms")]
    pub connect_timeout: Option<Duration>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            reconnect_interval: Duration::from_secs(3),
            max_reconnect_attempts: 5,
            throttle_window: Duration::from_secs(2),
            dedup_capacity: 10_000,
            dedup_ttl: Some(Duration::from_secs(24 * 60 * 60)),
            max_transfer_events: 500,
            idle_timeout: Some(Duration::from_secs(60)),
            connect_timeout: Some(Duration::from_secs(10)),
        }
    }
}

impl SyncSettings {
    /// Checks the invariants the pipeline relies on.
    ///
    /// A zero throttle window is allowed and disables throttling.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.reconnect_interval.is_zero() {
            return Err(SettingsError::MustBePositive("reconnect_interval_ms"));
        }
        if self.max_reconnect_attempts == 0 {
            return Err(SettingsError::MustBePositive("max_reconnect_attempts"));
        }
        if self.dedup_capacity == 0 {
            return Err(SettingsError::MustBePositive("dedup_capacity"));
        }
        if self.max_transfer_events == 0 {
            return Err(SettingsError::MustBePositive("max_transfer_events"));
        }
        Ok(())
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod option_duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}

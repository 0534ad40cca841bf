//! # Configuration Modules
//!
//! Settings for the sync pipeline and the endpoint selection rule.

/// Tunables for reconnect, throttle and memory bounds.
pub mod settings;

/// Pure endpoint selection from environment signals.
pub mod endpoint;

pub use endpoint::{select_endpoint, EnvironmentSignals};
pub use settings::{SettingsError, SyncSettings};

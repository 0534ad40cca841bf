//! # lib_opsfeed
//!
//! The real-time synchronization core behind the hospital operations dashboard.
//! It keeps a local cache of hospital occupancy, environmental context and
//! transfer events up to date from a push-based event stream.
//!
//! ## Folders:
//! - **`core`**: the pipeline itself. Transport abstraction, reconnection policy,
//!   envelope decoder, dedup filter, update throttle, state cache and the
//!   supervisor task that ties them together. Always compiled.
//! - **`configs`**: tunable settings and endpoint selection. Always compiled.
//! - **`ingestors`**: concrete transports (WebSocket, replay file). Feature `ingestors`.
//! - **`loggers`**: tracing subscriber setup with file output. Feature `loggers`.

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, unused_qualifications)]

pub mod configs;
pub mod core;
#[cfg(feature = "ingestors")]
pub mod ingestors;
#[cfg(feature = "loggers")]
pub mod loggers;

pub use crate::configs::{select_endpoint, EnvironmentSignals, SettingsError, SyncSettings};
pub use crate::core::{
    CacheReader, CacheWriter, ConnectionStatus, Dispatcher, ReconnectState, StateCache,
    SyncClient, SyncClientHandle,
};

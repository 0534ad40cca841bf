//! # Ingestors
//!
//! Concrete [`Transport`](crate::core::Transport) implementations. Each one
//! turns a specific source into the common stream of session events and leaves
//! retry decisions to the supervisor.
//!
//! ## Contained Modules:
//! - **`ws_session`**: WebSocket client over rustls with an inactivity watchdog.
//! - **`replay`**: plays back a recorded stream from a newline-delimited file.

/// The live WebSocket transport.
pub mod ws_session;
/// File-backed replay transport.
pub mod replay;

// --- Public API Re-exports ---
pub use replay::ReplayTransport;
pub use ws_session::WsTransport;

//! # Core Pipeline
//!
//! Transport events flow through one task:
//!
//! ```text
//! Transport ─▶ Supervisor ─▶ Decoder ─▶ Dispatcher ─┬─▶ DedupFilter ───┐
//!     ▲            │                                └─▶ UpdateThrottle ┴─▶ StateCache
//!     └─ Reconnect ┘
//! ```

/// Cache entities and connection status.
pub mod model;

/// Injectable time source.
pub mod clock;

/// Session abstraction and event types.
pub mod transport;

/// Broker topic filters and classification.
pub mod topics;

/// Raw frame to typed envelope.
pub mod envelope;

/// Bounded ledger of seen event keys.
pub mod dedup;

/// Per-source rate limit for metric updates.
pub mod throttle;

/// Single-writer, many-reader state cache.
pub mod state_cache;

/// Envelope routing into the cache.
pub mod dispatcher;

/// Reconnection state machine.
pub mod reconnect;

/// The task that runs it all.
pub mod supervisor;

pub use clock::{Clock, SystemClock};
pub use dispatcher::{DispatchCounters, DispatchOutcome, DispatchStats, Dispatcher};
pub use envelope::{DecodeError, Envelope};
pub use model::{ConnectionStatus, ExternalContext, HospitalState, TransferEvent, UrgencyTier};
pub use reconnect::{Directive, ReconnectPolicy, ReconnectState};
pub use state_cache::{CacheReader, CacheSnapshot, CacheWriter, StateCache};
pub use supervisor::{SyncClient, SyncClientHandle};
pub use transport::{EventSink, InboundFrame, SessionHandle, Transport, TransportEvent};

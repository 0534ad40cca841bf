//! Time source for the pipeline.
//!
//! Throttle windows and dedup lifetimes read a monotonic instant; cache records
//! are stamped with wall time. Both come from one injectable [`Clock`] so tests
//! can drive them.

use std::time::Instant;

use chrono::{DateTime, Utc};

/// Monotonic plus wall time.
pub trait Clock: Send + Sync {
    /// Monotonic instant for windows and lifetimes.
    fn instant(&self) -> Instant;
    /// Wall time for record stamps.
    fn wall(&self) -> DateTime<Utc>;
}

/// The real clock. Follows tokio's clock, so paused-time tests see it advance.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn instant(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn wall(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

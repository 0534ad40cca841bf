//! # Update Throttle
//!
//! Per-entity metrics can arrive far faster than the dashboard redraws. The
//! throttle lets at most one update per source key through each window. Updates
//! inside the window are dropped outright, not queued: the next update that
//! clears the window carries fresh data anyway.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Fixed-window, drop-based throttle keyed by source.
#[derive(Debug)]
pub struct UpdateThrottle {
    window: Duration,
    last_applied: HashMap<String, Instant>,
}

impl UpdateThrottle {
    /// A zero window lets every update through.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_applied: HashMap::new(),
        }
    }

    /// Returns `true` and stamps `source_key` when the window since its last
    /// applied update has fully elapsed. A clock that steps backwards counts as
    /// no time elapsed.
    pub fn should_apply(&mut self, source_key: &str, now: Instant) -> bool {
        match self.last_applied.get_mut(source_key) {
            Some(last) => {
                if now.saturating_duration_since(*last) >= self.window {
                    *last = now;
                    true
                } else {
                    false
                }
            }
            None => {
                self.last_applied.insert(source_key.to_string(), now);
                true
            }
        }
    }

    /// The configured window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Number of distinct sources seen so far.
    pub fn tracked_sources(&self) -> usize {
        self.last_applied.len()
    }
}

//! # Reconnection Policy
//!
//! A pure state machine deciding when a transport session should be (re)opened.
//! It owns no timers and performs no I/O: every input returns a [`Directive`]
//! that the supervisor carries out. That keeps the policy testable without a
//! runtime.
//!
//! ```text
//!  Idle ──start──▶ Connecting ──opened──▶ Connected
//!                    ▲    │                  │
//!        backoff     │    └──lost──┐  ┌─lost─┘
//!        elapsed     │             ▼  ▼
//!                    └──────── BackingOff ──(attempts == max)──▶ Exhausted
//! ```
//!
//! `Exhausted` is terminal until [`ReconnectPolicy::restart`] or a fresh
//! [`ReconnectPolicy::start`].

use std::time::Duration;

use serde::Serialize;

/// Lifecycle state of the connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconnectState {
    /// Not started, or stopped.
    #[default]
    Idle,
    /// A session is being opened.
    Connecting,
    /// A session is open.
    Connected,
    /// Waiting for the retry delay after a loss.
    BackingOff,
    /// Gave up after too many consecutive failures.
    Exhausted,
}

/// Action the owner of the policy must take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Open a new session.
    Open,
    /// Call [`ReconnectPolicy::on_backoff_elapsed`] after this delay.
    ScheduleRetry(Duration),
    /// Stop trying; surface the connection as disconnected.
    GiveUp,
    /// Nothing to do.
    Stay,
}

/// Bounded, fixed-delay reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    state: ReconnectState,
    attempts: u32,
    interval: Duration,
    max_attempts: u32,
}

impl ReconnectPolicy {
    /// A policy waiting `interval` between attempts, giving up after
    /// `max_attempts` consecutive losses.
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            state: ReconnectState::Idle,
            attempts: 0,
            interval,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Current state.
    pub fn state(&self) -> ReconnectState {
        self.state
    }

    /// Consecutive losses since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Starts connecting. A no-op unless idle or exhausted.
    pub fn start(&mut self) -> Directive {
        match self.state {
            ReconnectState::Idle | ReconnectState::Exhausted => {
                self.attempts = 0;
                self.state = ReconnectState::Connecting;
                Directive::Open
            }
            _ => Directive::Stay,
        }
    }

    /// Forces a fresh connection cycle from any state, with a clean counter.
    /// The owner must close any open session first.
    pub fn restart(&mut self) -> Directive {
        self.attempts = 0;
        self.state = ReconnectState::Connecting;
        Directive::Open
    }

    /// The session reported `opened`.
    pub fn on_opened(&mut self) -> Directive {
        if self.state == ReconnectState::Connecting {
            self.state = ReconnectState::Connected;
            self.attempts = 0;
        }
        Directive::Stay
    }

    /// The session reported `closed` or `error`, or failed to open. Repeated
    /// reports for the same loss are ignored.
    pub fn on_connection_lost(&mut self) -> Directive {
        match self.state {
            ReconnectState::Connecting | ReconnectState::Connected => {
                self.attempts = self.attempts.saturating_add(1);
                if self.attempts >= self.max_attempts {
                    self.state = ReconnectState::Exhausted;
                    Directive::GiveUp
                } else {
                    self.state = ReconnectState::BackingOff;
                    Directive::ScheduleRetry(self.interval)
                }
            }
            _ => Directive::Stay,
        }
    }

    /// The retry delay ran out.
    pub fn on_backoff_elapsed(&mut self) -> Directive {
        if self.state == ReconnectState::BackingOff {
            self.state = ReconnectState::Connecting;
            Directive::Open
        } else {
            Directive::Stay
        }
    }

    /// Stops for good. Pending retries must be dropped by the owner.
    pub fn stop(&mut self) {
        self.state = ReconnectState::Idle;
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DELAY: Duration = Duration::from_secs(3);

    #[test]
    fn test_happy_path() {
        let mut policy = ReconnectPolicy::new(DELAY, 5);
        assert_eq!(policy.start(), Directive::Open);
        assert_eq!(policy.state(), ReconnectState::Connecting);
        policy.on_opened();
        assert_eq!(policy.state(), ReconnectState::Connected);
    }

    #[test]
    fn test_start_while_active_is_noop() {
        let mut policy = ReconnectPolicy::new(DELAY, 5);
        policy.start();
        assert_eq!(policy.start(), Directive::Stay);
        policy.on_opened();
        assert_eq!(policy.start(), Directive::Stay);
        policy.on_connection_lost();
        assert_eq!(policy.start(), Directive::Stay);
    }

    #[test]
    fn test_loss_schedules_fixed_delay() {
        let mut policy = ReconnectPolicy::new(DELAY, 5);
        policy.start();
        policy.on_opened();
        assert_eq!(policy.on_connection_lost(), Directive::ScheduleRetry(DELAY));
        assert_eq!(policy.state(), ReconnectState::BackingOff);
        assert_eq!(policy.on_backoff_elapsed(), Directive::Open);
        assert_eq!(policy.state(), ReconnectState::Connecting);
    }

    #[test]
    fn test_exhausts_after_max_consecutive_failures() {
        let mut policy = ReconnectPolicy::new(DELAY, 3);
        let mut opens = 0;
        let mut directive = policy.start();
        loop {
            match directive {
                Directive::Open => {
                    opens += 1;
                    directive = policy.on_connection_lost();
                }
                Directive::ScheduleRetry(_) => directive = policy.on_backoff_elapsed(),
                Directive::GiveUp => break,
                Directive::Stay => panic!("policy stalled"),
            }
        }
        assert_eq!(opens, 3);
        assert_eq!(policy.state(), ReconnectState::Exhausted);
        assert_eq!(policy.on_backoff_elapsed(), Directive::Stay);
        assert_eq!(policy.on_connection_lost(), Directive::Stay);
    }

    #[test]
    fn test_success_resets_counter() {
        let mut policy = ReconnectPolicy::new(DELAY, 2);
        policy.start();
        policy.on_connection_lost();
        policy.on_backoff_elapsed();
        assert_eq!(policy.attempts(), 1);
        policy.on_opened();
        assert_eq!(policy.attempts(), 0);
        assert_eq!(policy.on_connection_lost(), Directive::ScheduleRetry(DELAY));
    }

    #[test]
    fn test_duplicate_loss_reports_count_once() {
        let mut policy = ReconnectPolicy::new(DELAY, 5);
        policy.start();
        policy.on_opened();
        policy.on_connection_lost();
        assert_eq!(policy.on_connection_lost(), Directive::Stay);
        assert_eq!(policy.attempts(), 1);
    }

    #[test]
    fn test_restart_leaves_exhaustion() {
        let mut policy = ReconnectPolicy::new(DELAY, 1);
        policy.start();
        assert_eq!(policy.on_connection_lost(), Directive::GiveUp);
        assert_eq!(policy.restart(), Directive::Open);
        assert_eq!(policy.state(), ReconnectState::Connecting);
        assert_eq!(policy.attempts(), 0);
    }

    #[test]
    fn test_stop_returns_to_idle() {
        let mut policy = ReconnectPolicy::new(DELAY, 5);
        policy.start();
        policy.on_connection_lost();
        policy.stop();
        assert_eq!(policy.state(), ReconnectState::Idle);
        assert_eq!(policy.on_backoff_elapsed(), Directive::Stay);
    }
}

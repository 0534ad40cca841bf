//! # Test Doubles
//!
//! Shared fixtures for the integration tests under `tests/`:
//!
//! - [`ScriptedTransport`]: a transport whose sessions follow a script, and
//!   whose sinks stay reachable so a test can inject events by hand.
//! - [`ManualClock`]: a clock that only moves when told to.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use lib_opsfeed::core::{Clock, EventSink, Transport, TransportEvent};
use tokio_util::sync::CancellationToken;

/// What a scripted session does as soon as it is opened.
#[derive(Debug, Clone)]
pub enum Script {
    /// Report `opened` and wait.
    Open,
    /// Fail the attempt without ever opening.
    Fail(String),
    /// Report `opened`, then the given events in order.
    OpenThen(Vec<TransportEvent>),
}

struct Session {
    endpoint: String,
    sink: EventSink,
    cancel: CancellationToken,
}

/// Transport driven by a queue of [`Script`]s. When the queue runs dry the
/// fallback script is used.
pub struct ScriptedTransport {
    scripts: Mutex<VecDeque<Script>>,
    fallback: Script,
    sessions: Mutex<Vec<Session>>,
}

impl ScriptedTransport {
    /// Every session follows `fallback`.
    pub fn new(fallback: Script) -> Self {
        Self {
            scripts: Mutex::new(VecDeque::new()),
            fallback,
            sessions: Mutex::new(Vec::new()),
        }
    }

    /// Sessions follow `scripts` in order, then `fallback`.
    pub fn with_scripts(scripts: Vec<Script>, fallback: Script) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            fallback,
            sessions: Mutex::new(Vec::new()),
        }
    }

    /// Sessions opened so far.
    pub fn connects(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    /// Endpoints in connect order.
    pub fn endpoints(&self) -> Vec<String> {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.endpoint.clone())
            .collect()
    }

    /// Injects an event into the most recent session. Returns whether the
    /// session still accepted it.
    pub fn emit(&self, event: TransportEvent) -> bool {
        let sessions = self.sessions.lock().unwrap();
        match sessions.last() {
            Some(session) => session.sink.emit(event),
            None => false,
        }
    }

    /// Sink of the n-th session (0-based).
    pub fn sink(&self, n: usize) -> Option<EventSink> {
        self.sessions.lock().unwrap().get(n).map(|s| s.sink.clone())
    }

    /// Whether the n-th session was cancelled by its owner.
    pub fn is_cancelled(&self, n: usize) -> bool {
        self.sessions
            .lock()
            .unwrap()
            .get(n)
            .is_some_and(|s| s.cancel.is_cancelled())
    }

    /// Sessions that are still open from the owner's point of view.
    pub fn live_sessions(&self) -> usize {
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .filter(|s| !s.cancel.is_cancelled())
            .count()
    }
}

impl Transport for ScriptedTransport {
    fn connect(&self, endpoint: &str, sink: EventSink, cancel: CancellationToken) {
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match script {
            Script::Open => {
                sink.emit(TransportEvent::Opened);
            }
            Script::Fail(detail) => {
                sink.emit(TransportEvent::Error(detail));
            }
            Script::OpenThen(events) => {
                sink.emit(TransportEvent::Opened);
                for event in events {
                    sink.emit(event);
                }
            }
        }

        self.sessions.lock().unwrap().push(Session {
            endpoint: endpoint.to_string(),
            sink,
            cancel,
        });
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// A clock that stands still until advanced.
pub struct ManualClock {
    now: Mutex<(Instant, DateTime<Utc>)>,
}

impl ManualClock {
    /// Starts at the current real time.
    pub fn new() -> Self {
        Self {
            now: Mutex::new((Instant::now(), Utc::now())),
        }
    }

    /// Moves both the monotonic and the wall clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        now.0 += by;
        now.1 += chrono::Duration::from_std(by).unwrap();
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn instant(&self) -> Instant {
        self.now.lock().unwrap().0
    }

    fn wall(&self) -> DateTime<Utc> {
        self.now.lock().unwrap().1
    }
}

/// Wraps `data` in a `{ "type", "data" }` envelope.
pub fn envelope(kind: &str, data: serde_json::Value) -> String {
    serde_json::json!({ "type": kind, "data": data }).to_string()
}

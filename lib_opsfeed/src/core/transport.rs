//! # Transport Abstraction
//!
//! A transport opens one session per `connect` call and reports what happens on
//! it as [`TransportEvent`]s. Events are tagged with the session id and pushed
//! into a single channel owned by the supervisor, so the supervisor sees one
//! ordered stream regardless of how many sessions came and went.
//!
//! Closing a session through its [`SessionHandle`] shuts the event gate before
//! it cancels the task: once `close()` returns, no further event from that
//! session reaches the channel.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Raw inbound frame. Broker transports set `topic`; socket transports don't.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    /// Broker topic the frame was published on.
    pub topic: Option<String>,
    /// Frame body.
    pub text: String,
}

impl InboundFrame {
    /// A socket frame carrying a typed wrapper.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            topic: None,
            text: text.into(),
        }
    }

    /// A broker frame carrying a bare payload.
    pub fn on_topic(topic: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            topic: Some(topic.into()),
            text: text.into(),
        }
    }
}

/// Lifecycle and data events of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The session is established.
    Opened,
    /// A frame arrived.
    Message(InboundFrame),
    /// The session ended, with the close code when the peer sent one.
    Closed(Option<u16>),
    /// The session failed. A `Closed` may or may not follow.
    Error(String),
}

/// Monotonic session identifier.
pub type SessionId = u64;

/// A transport event tagged with its session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    /// Originating session.
    pub session: SessionId,
    /// What happened.
    pub event: TransportEvent,
}

/// Where a session reports its events. Cloneable into the session's tasks.
#[derive(Debug, Clone)]
pub struct EventSink {
    session: SessionId,
    tx: mpsc::UnboundedSender<SessionEvent>,
    open: Arc<Mutex<bool>>,
}

impl EventSink {
    /// Forwards an event. Returns `false` once the session was closed or the
    /// receiver is gone; callers should stop producing then.
    pub fn emit(&self, event: TransportEvent) -> bool {
        let open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        if !*open {
            return false;
        }
        self.tx
            .send(SessionEvent {
                session: self.session,
                event,
            })
            .is_ok()
    }

    /// Session this sink belongs to.
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Whether the owning handle has closed the session.
    pub fn is_closed(&self) -> bool {
        !*self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owner side of a session.
#[derive(Debug)]
pub struct SessionHandle {
    id: SessionId,
    cancel: CancellationToken,
    open: Arc<Mutex<bool>>,
}

impl SessionHandle {
    /// Session id.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Closes the session. Idempotent. No event is delivered after this returns.
    pub fn close(&self) {
        *self.open.lock().unwrap_or_else(PoisonError::into_inner) = false;
        self.cancel.cancel();
    }

    /// Whether `close()` has been called.
    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.close();
    }
}

/// A way to reach the event source.
///
/// `connect` must not block: it spawns whatever it needs on the current tokio
/// runtime and reports through `sink`. It must stop producing promptly once
/// `cancel` fires. Exactly one `Opened` precedes any `Message`; a failed
/// attempt reports `Error` or `Closed` without `Opened`.
pub trait Transport: Send + Sync {
    /// Starts a session against `endpoint`.
    fn connect(&self, endpoint: &str, sink: EventSink, cancel: CancellationToken);

    /// Short name for logs.
    fn name(&self) -> &'static str {
        "transport"
    }
}

/// Opens a session on `transport` and returns its handle.
pub fn open_session(
    transport: &dyn Transport,
    endpoint: &str,
    id: SessionId,
    tx: mpsc::UnboundedSender<SessionEvent>,
) -> SessionHandle {
    let open = Arc::new(Mutex::new(true));
    let cancel = CancellationToken::new();
    let sink = EventSink {
        session: id,
        tx,
        open: Arc::clone(&open),
    };
    transport.connect(endpoint, sink, cancel.clone());
    SessionHandle { id, cancel, open }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct CapturingTransport {
        sinks: StdMutex<Vec<(EventSink, CancellationToken)>>,
    }

    impl Transport for CapturingTransport {
        fn connect(&self, _endpoint: &str, sink: EventSink, cancel: CancellationToken) {
            self.sinks.lock().unwrap().push((sink, cancel));
        }
    }

    #[test]
    fn test_events_are_tagged_with_session() {
        let transport = CapturingTransport {
            sinks: StdMutex::new(Vec::new()),
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _handle = open_session(&transport, "ws://x", 7, tx);
        let (sink, _) = transport.sinks.lock().unwrap().pop().unwrap();
        assert!(sink.emit(TransportEvent::Opened));
        let received = rx.try_recv().unwrap();
        assert_eq!(received.session, 7);
        assert_eq!(received.event, TransportEvent::Opened);
    }

    #[test]
    fn test_no_event_after_close() {
        let transport = CapturingTransport {
            sinks: StdMutex::new(Vec::new()),
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handle = open_session(&transport, "ws://x", 1, tx);
        let (sink, cancel) = transport.sinks.lock().unwrap().pop().unwrap();

        handle.close();
        handle.close();

        assert!(cancel.is_cancelled());
        assert!(sink.is_closed());
        assert!(!sink.emit(TransportEvent::Message(InboundFrame::text("late"))));
        assert!(!sink.emit(TransportEvent::Closed(Some(1000))));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dropping_handle_closes_session() {
        let transport = CapturingTransport {
            sinks: StdMutex::new(Vec::new()),
        };
        let (tx, _rx) = mpsc::unbounded_channel();
        drop(open_session(&transport, "ws://x", 1, tx));
        let (sink, cancel) = transport.sinks.lock().unwrap().pop().unwrap();
        assert!(cancel.is_cancelled());
        assert!(sink.is_closed());
    }
}

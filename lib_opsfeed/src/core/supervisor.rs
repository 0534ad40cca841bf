//! # Sync Client Supervisor
//!
//! One tokio task owns the whole pipeline: the reconnection policy, the open
//! transport session, the backoff timer and the dispatcher (and with it the
//! only cache writer). It waits on three things at once:
//!
//! - commands from the [`SyncClientHandle`] (restart, shutdown),
//! - the next event from the current session,
//! - the backoff timer, when one is armed.
//!
//! Everything else (decoding, filtering, cache writes) happens inline, so
//! messages are applied in transport order and no lock is ever contended by
//! the pipeline itself.
//!
//! Events carry their session id. Anything from a session other than the
//! current one is stale and dropped.

use std::future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Sleep;

use crate::configs::{SettingsError, SyncSettings};
use crate::core::clock::Clock;
use crate::core::dispatcher::{DispatchCounters, DispatchStats, Dispatcher};
use crate::core::model::ConnectionStatus;
use crate::core::reconnect::{Directive, ReconnectPolicy, ReconnectState};
use crate::core::state_cache::{CacheReader, StateCache};
use crate::core::transport::{
    open_session, SessionEvent, SessionHandle, SessionId, Transport, TransportEvent,
};

#[derive(Debug)]
enum Command {
    Restart,
    Shutdown,
}

/// The supervisor task. Built and spawned by [`SyncClient::spawn`].
pub struct SyncClient {
    transport: Arc<dyn Transport>,
    endpoint: String,
    policy: ReconnectPolicy,
    dispatcher: Dispatcher,
    session: Option<SessionHandle>,
    next_session: SessionId,
    events_tx: mpsc::UnboundedSender<SessionEvent>,
    events_rx: mpsc::UnboundedReceiver<SessionEvent>,
    backoff: Option<Pin<Box<Sleep>>>,
    state_tx: watch::Sender<ReconnectState>,
}

impl SyncClient {
    /// Validates `settings`, spawns the supervisor on the current runtime and
    /// starts connecting to `endpoint`.
    pub fn spawn(
        transport: Arc<dyn Transport>,
        endpoint: impl Into<String>,
        settings: &SyncSettings,
        clock: Arc<dyn Clock>,
    ) -> Result<SyncClientHandle, SettingsError> {
        settings.validate()?;

        let (writer, reader) = StateCache::new(settings.max_transfer_events);
        let dispatcher = Dispatcher::new(writer, settings, clock);
        let counters = dispatcher.counters();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ReconnectState::Idle);
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let client = SyncClient {
            transport,
            endpoint: endpoint.into(),
            policy: ReconnectPolicy::new(
                settings.reconnect_interval,
                settings.max_reconnect_attempts,
            ),
            dispatcher,
            session: None,
            next_session: 0,
            events_tx,
            events_rx,
            backoff: None,
            state_tx,
        };
        let task = tokio::spawn(client.run(command_rx));

        Ok(SyncClientHandle {
            commands: command_tx,
            state: state_rx,
            reader,
            counters,
            task,
        })
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        tracing::info!(endpoint = %self.endpoint, transport = self.transport.name(), "Sync client started");
        let directive = self.policy.start();
        self.apply(directive);

        loop {
            tokio::select! {
                biased;
                command = commands.recv() => match command {
                    Some(Command::Restart) => self.restart(),
                    Some(Command::Shutdown) | None => break,
                },
                Some(event) = self.events_rx.recv() => self.on_event(event),
                _ = backoff_elapsed(&mut self.backoff) => {
                    self.backoff = None;
                    let directive = self.policy.on_backoff_elapsed();
                    self.apply(directive);
                }
            }
        }

        self.teardown();
    }

    fn on_event(&mut self, SessionEvent { session, event }: SessionEvent) {
        if self.session.as_ref().map(SessionHandle::id) != Some(session) {
            tracing::trace!(session, "Dropping event from stale session");
            return;
        }

        match event {
            TransportEvent::Opened => {
                tracing::info!(session, endpoint = %self.endpoint, "Session opened");
                self.policy.on_opened();
                self.dispatcher.set_connection_status(ConnectionStatus::Connected);
                self.publish_state();
            }
            TransportEvent::Message(frame) => {
                self.dispatcher.handle_frame(&frame);
            }
            TransportEvent::Closed(code) => {
                tracing::info!(session, code, "Session closed");
                self.dispatcher.set_connection_status(ConnectionStatus::Disconnected);
                self.on_lost();
            }
            TransportEvent::Error(detail) => {
                tracing::warn!(session, error = %detail, "Session failed");
                self.dispatcher.set_connection_status(ConnectionStatus::Error);
                self.on_lost();
            }
        }
    }

    fn on_lost(&mut self) {
        self.close_session();
        let directive = self.policy.on_connection_lost();
        self.apply(directive);
    }

    fn restart(&mut self) {
        tracing::info!("Restart requested");
        self.backoff = None;
        self.close_session();
        let directive = self.policy.restart();
        self.apply(directive);
    }

    fn apply(&mut self, directive: Directive) {
        match directive {
            Directive::Open => self.open_session(),
            Directive::ScheduleRetry(delay) => {
                tracing::info!(
                    attempt = self.policy.attempts(),
                    delay_ms = delay.as_millis() as u64,
                    "Reconnecting after delay"
                );
                self.backoff = Some(Box::pin(tokio::time::sleep(delay)));
            }
            Directive::GiveUp => {
                tracing::error!(
                    attempt = self.policy.attempts(),
                    endpoint = %self.endpoint,
                    "Reconnection attempts exhausted; staying disconnected until restarted"
                );
                self.dispatcher.set_connection_status(ConnectionStatus::Disconnected);
            }
            Directive::Stay => {}
        }
        self.publish_state();
    }

    fn open_session(&mut self) {
        self.close_session();
        self.next_session += 1;
        let id = self.next_session;
        tracing::debug!(session = id, endpoint = %self.endpoint, "Opening session");
        self.dispatcher.set_connection_status(ConnectionStatus::Connecting);
        self.session = Some(open_session(
            self.transport.as_ref(),
            &self.endpoint,
            id,
            self.events_tx.clone(),
        ));
    }

    fn close_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.close();
        }
    }

    fn teardown(&mut self) {
        self.backoff = None;
        self.close_session();
        self.policy.stop();
        self.dispatcher.set_connection_status(ConnectionStatus::Disconnected);
        self.publish_state();
        tracing::info!("Sync client stopped");
    }

    fn publish_state(&self) {
        self.state_tx.send_if_modified(|state| {
            let next = self.policy.state();
            let changed = *state != next;
            *state = next;
            changed
        });
    }
}

async fn backoff_elapsed(backoff: &mut Option<Pin<Box<Sleep>>>) {
    match backoff {
        Some(sleep) => sleep.as_mut().await,
        None => future::pending().await,
    }
}

/// Control surface of a running [`SyncClient`].
#[derive(Debug)]
pub struct SyncClientHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ReconnectState>,
    reader: CacheReader,
    counters: Arc<DispatchCounters>,
    task: JoinHandle<()>,
}

impl SyncClientHandle {
    /// Forces a new connection cycle with a fresh attempt counter. The way out
    /// of [`ReconnectState::Exhausted`].
    pub fn restart(&self) -> bool {
        self.commands.send(Command::Restart).is_ok()
    }

    /// Stops the supervisor: the retry timer is dropped and the session closed
    /// before this returns.
    pub async fn shutdown(self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "Sync client task ended abnormally");
        }
    }

    /// Current policy state.
    pub fn state(&self) -> ReconnectState {
        *self.state.borrow()
    }

    /// Policy state changes.
    pub fn watch_state(&self) -> watch::Receiver<ReconnectState> {
        self.state.clone()
    }

    /// Read access to the cache.
    pub fn reader(&self) -> CacheReader {
        self.reader.clone()
    }

    /// Dispatch totals so far.
    pub fn stats(&self) -> DispatchStats {
        self.counters.snapshot()
    }

    /// Shared dispatch counters, for reporting from another task.
    pub fn counters(&self) -> Arc<DispatchCounters> {
        Arc::clone(&self.counters)
    }

    /// Whether the supervisor task has ended.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::SystemClock;
    use crate::core::transport::{EventSink, InboundFrame};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    /// Opens or fails every session on the spot and keeps the sinks around.
    struct InstantTransport {
        succeed: bool,
        sinks: Mutex<Vec<(EventSink, CancellationToken)>>,
    }

    impl InstantTransport {
        fn new(succeed: bool) -> Arc<Self> {
            Arc::new(Self {
                succeed,
                sinks: Mutex::new(Vec::new()),
            })
        }

        fn connects(&self) -> usize {
            self.sinks.lock().unwrap().len()
        }

        fn latest(&self) -> EventSink {
            self.sinks.lock().unwrap().last().unwrap().0.clone()
        }
    }

    impl Transport for InstantTransport {
        fn connect(&self, _endpoint: &str, sink: EventSink, cancel: CancellationToken) {
            if self.succeed {
                sink.emit(TransportEvent::Opened);
            } else {
                sink.emit(TransportEvent::Error("connection refused".into()));
            }
            self.sinks.lock().unwrap().push((sink, cancel));
        }
    }

    fn settings(max_attempts: u32) -> SyncSettings {
        SyncSettings {
            reconnect_interval: Duration::from_secs(3),
            max_reconnect_attempts: max_attempts,
            ..SyncSettings::default()
        }
    }

    async fn wait_for(handle: &SyncClientHandle, target: ReconnectState) {
        let mut state = handle.watch_state();
        state.wait_for(|s| *s == target).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let transport = InstantTransport::new(false);
        let handle =
            SyncClient::spawn(transport.clone(), "ws://x", &settings(3), Arc::new(SystemClock))
                .unwrap();

        wait_for(&handle, ReconnectState::Exhausted).await;
        assert_eq!(transport.connects(), 3);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.connects(), 3);
        assert_eq!(handle.reader().connection_status(), ConnectionStatus::Disconnected);

        assert!(handle.restart());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(transport.connects(), 4);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_close_opens_one_session_per_cycle() {
        let transport = InstantTransport::new(true);
        let handle =
            SyncClient::spawn(transport.clone(), "ws://x", &settings(5), Arc::new(SystemClock))
                .unwrap();
        wait_for(&handle, ReconnectState::Connected).await;

        transport.latest().emit(TransportEvent::Closed(Some(1006)));
        wait_for(&handle, ReconnectState::BackingOff).await;
        assert_eq!(handle.reader().connection_status(), ConnectionStatus::Disconnected);

        tokio::time::sleep(Duration::from_millis(2900)).await;
        assert_eq!(transport.connects(), 1);

        wait_for(&handle, ReconnectState::Connected).await;
        assert_eq!(transport.connects(), 2);
        assert_eq!(handle.reader().connection_status(), ConnectionStatus::Connected);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_session_events_are_dropped() {
        let transport = InstantTransport::new(true);
        let handle =
            SyncClient::spawn(transport.clone(), "ws://x", &settings(5), Arc::new(SystemClock))
                .unwrap();
        wait_for(&handle, ReconnectState::Connected).await;
        let first = transport.latest();

        handle.restart();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(transport.connects(), 2);

        assert!(!first.emit(TransportEvent::Closed(Some(1000))));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(handle.state(), ReconnectState::Connected);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_messages_reach_the_cache() {
        let transport = InstantTransport::new(true);
        let handle =
            SyncClient::spawn(transport.clone(), "ws://x", &settings(5), Arc::new(SystemClock))
                .unwrap();
        wait_for(&handle, ReconnectState::Connected).await;
        let reader = handle.reader();
        let mut changes = reader.subscribe();

        transport.latest().emit(TransportEvent::Message(InboundFrame::text(
            r#"{"type":"full_state","data":{"hospitals":{"a":{"saturation":0.5}}}}"#,
        )));
        changes
            .wait_for(|_| reader.hospital("a").is_some())
            .await
            .unwrap();
        assert_eq!(reader.hospital("a").unwrap().saturation, 0.5);
        assert_eq!(handle.stats().applied, 1);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_closes_session_and_clears_timer() {
        let transport = InstantTransport::new(true);
        let handle =
            SyncClient::spawn(transport.clone(), "ws://x", &settings(5), Arc::new(SystemClock))
                .unwrap();
        wait_for(&handle, ReconnectState::Connected).await;
        transport.latest().emit(TransportEvent::Error("reset".into()));
        wait_for(&handle, ReconnectState::BackingOff).await;

        let reader = handle.reader();
        handle.shutdown().await;

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(transport.connects(), 1);
        assert!(transport.latest().is_closed());
        assert_eq!(reader.connection_status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_invalid_settings_are_rejected() {
        let result = SyncClient::spawn(
            InstantTransport::new(true),
            "ws://x",
            &settings(0),
            Arc::new(SystemClock),
        );
        assert!(matches!(result, Err(SettingsError::MustBePositive(_))));
    }
}

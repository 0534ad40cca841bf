//! # WebSocket Transport
//!
//! One task per session over `tokio-tungstenite` (rustls). Text frames become
//! messages; binary frames are accepted when they hold UTF-8. The task watches
//! for three endings: the peer closing, a read error, and silence longer than
//! the idle timeout (a zombie connection that never reports anything). A
//! handshake that outlives the connect timeout is reported as an error too.
//!
//! The task reports and exits. Reconnection is the supervisor's business.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::time::Instant;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::configs::SyncSettings;
use crate::core::transport::{EventSink, InboundFrame, Transport, TransportEvent};

/// How often the watchdog checks for silence.
const WATCHDOG_TICK: Duration = Duration::from_secs(1);

/// WebSocket transport.
#[derive(Debug, Clone, Default)]
pub struct WsTransport {
    idle_timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
}

impl WsTransport {
    /// `idle_timeout`: longest allowed gap between inbound frames (pings count).
    /// `None` disables the watchdog.
    pub fn new(idle_timeout: Option<Duration>) -> Self {
        Self {
            idle_timeout,
            connect_timeout: None,
        }
    }

    /// Bounds the TCP, TLS and WebSocket handshake. `None` leaves it unbounded.
    pub fn with_connect_timeout(mut self, connect_timeout: Option<Duration>) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Transport configured from the pipeline settings.
    pub fn from_settings(settings: &SyncSettings) -> Self {
        Self::new(settings.idle_timeout).with_connect_timeout(settings.connect_timeout)
    }
}

impl Transport for WsTransport {
    fn connect(&self, endpoint: &str, sink: EventSink, cancel: CancellationToken) {
        let endpoint = endpoint.to_string();
        let transport = self.clone();
        tokio::spawn(async move {
            run_session(endpoint, transport, sink, cancel).await;
        });
    }

    fn name(&self) -> &'static str {
        "websocket"
    }
}

/// Rejects anything that is not a `ws://` or `wss://` URL.
pub fn validate_endpoint(endpoint: &str) -> Result<Url, String> {
    let url = Url::parse(endpoint).map_err(|e| format!("invalid endpoint `{}`: {}", endpoint, e))?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(format!("unsupported scheme `{}` in `{}`", other, endpoint)),
    }
}

async fn run_session(
    endpoint: String,
    transport: WsTransport,
    sink: EventSink,
    cancel: CancellationToken,
) {
    let WsTransport {
        idle_timeout,
        connect_timeout,
    } = transport;
    let session = sink.session();
    let url = match validate_endpoint(&endpoint) {
        Ok(url) => url,
        Err(detail) => {
            sink.emit(TransportEvent::Error(detail));
            return;
        }
    };

    tracing::debug!(session, endpoint = %url, "Connecting");
    let handshake = async {
        match connect_timeout {
            Some(limit) => match tokio::time::timeout(limit, connect_async(url.as_str())).await {
                Ok(result) => result.map_err(|e| format!("connect failed: {}", e)),
                Err(_) => Err(format!("connect timed out after {}ms", limit.as_millis())),
            },
            None => connect_async(url.as_str())
                .await
                .map_err(|e| format!("connect failed: {}", e)),
        }
    };
    let ws_stream = tokio::select! {
        _ = cancel.cancelled() => return,
        result = handshake => match result {
            Ok((ws_stream, _response)) => ws_stream,
            Err(detail) => {
                tracing::warn!(session, endpoint = %url, error = %detail, "Connect failed");
                sink.emit(TransportEvent::Error(detail));
                return;
            }
        },
    };

    if !sink.emit(TransportEvent::Opened) {
        return;
    }

    let (mut write, mut read) = ws_stream.split();
    let mut last_activity = Instant::now();
    let mut watchdog = tokio::time::interval(WATCHDOG_TICK);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!(session, "Session cancelled; closing socket");
                let _ = write.close().await;
                return;
            }
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    last_activity = Instant::now();
                    if !sink.emit(TransportEvent::Message(InboundFrame::text(text.as_str()))) {
                        let _ = write.close().await;
                        return;
                    }
                }
                Some(Ok(Message::Binary(bin))) => {
                    last_activity = Instant::now();
                    match String::from_utf8(bin.to_vec()) {
                        Ok(text) => {
                            if !sink.emit(TransportEvent::Message(InboundFrame::text(text))) {
                                let _ = write.close().await;
                                return;
                            }
                        }
                        Err(_) => tracing::warn!(session, bytes = bin.len(), "Dropping non UTF-8 binary frame"),
                    }
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                    // Heartbeats keep the watchdog quiet during low volume
                    last_activity = Instant::now();
                }
                Some(Ok(Message::Close(frame))) => {
                    let code = frame.map(|f| u16::from(f.code));
                    sink.emit(TransportEvent::Closed(code));
                    return;
                }
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(e)) => {
                    sink.emit(TransportEvent::Error(format!("read failed: {}", e)));
                    return;
                }
                None => {
                    sink.emit(TransportEvent::Closed(None));
                    return;
                }
            },
            _ = watchdog.tick(), if idle_timeout.is_some() => {
                if let Some(timeout) = idle_timeout {
                    if last_activity.elapsed() > timeout {
                        tracing::warn!(session, timeout_s = timeout.as_secs(), "Inactivity timeout");
                        let _ = write.close().await;
                        sink.emit(TransportEvent::Error(format!(
                            "no frame received for {}s",
                            timeout.as_secs()
                        )));
                        return;
                    }
                }
            }
        }
    }
}

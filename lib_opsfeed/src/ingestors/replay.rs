//! # Replay Transport
//!
//! Plays a recorded stream back from a file, for demos and offline debugging.
//! The endpoint is the file path. The format is one frame per line:
//!
//! ```text
//! {"type":"full_state","data":{...}}
//! hospitals/h-3/metrics {"saturation":0.82}
//! ```
//!
//! A line starting with `{` is a socket frame; anything else is
//! `<topic> <payload>` for broker frames. Blank lines are skipped. After the
//! last line the session closes with code 1000.

use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::core::transport::{EventSink, InboundFrame, Transport, TransportEvent};

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;

/// Transport reading frames from a recording.
#[derive(Debug, Clone, Default)]
pub struct ReplayTransport {
    pace: Duration,
}

impl ReplayTransport {
    /// `pace` is the pause between frames; zero replays as fast as possible.
    pub fn new(pace: Duration) -> Self {
        Self { pace }
    }
}

impl Transport for ReplayTransport {
    fn connect(&self, endpoint: &str, sink: EventSink, cancel: CancellationToken) {
        let path = endpoint.to_string();
        let pace = self.pace;
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = replay(path, pace, &sink) => {}
            }
        });
    }

    fn name(&self) -> &'static str {
        "replay"
    }
}

/// Parses one recorded line. `None` for blank lines.
pub fn parse_line(line: &str) -> Option<InboundFrame> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if line.starts_with('{') {
        return Some(InboundFrame::text(line));
    }
    match line.split_once(char::is_whitespace) {
        Some((topic, payload)) => Some(InboundFrame::on_topic(topic, payload.trim_start())),
        None => Some(InboundFrame::on_topic(line, "")),
    }
}

async fn replay(path: String, pace: Duration, sink: &EventSink) {
    let file = match File::open(&path).await {
        Ok(file) => file,
        Err(e) => {
            sink.emit(TransportEvent::Error(format!("cannot open recording {}: {}", path, e)));
            return;
        }
    };
    if !sink.emit(TransportEvent::Opened) {
        return;
    }

    let mut lines = BufReader::new(file).lines();
    let mut frames = 0usize;
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let Some(frame) = parse_line(&line) else {
                    continue;
                };
                if !sink.emit(TransportEvent::Message(frame)) {
                    return;
                }
                frames += 1;
                if !pace.is_zero() {
                    tokio::time::sleep(pace).await;
                }
            }
            Ok(None) => break,
            Err(e) => {
                sink.emit(TransportEvent::Error(format!("read failed in {}: {}", path, e)));
                return;
            }
        }
    }

    tracing::info!(session = sink.session(), frames, path = %path, "Replay finished");
    sink.emit(TransportEvent::Closed(Some(CLOSE_NORMAL)));
}

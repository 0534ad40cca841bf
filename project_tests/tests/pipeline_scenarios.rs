use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use lib_opsfeed::core::{Clock, InboundFrame, ReconnectState, SystemClock, TransportEvent};
use lib_opsfeed::ingestors::ReplayTransport;
use lib_opsfeed::{CacheReader, ConnectionStatus, Dispatcher, StateCache, SyncClient, SyncSettings};
use project_tests::{envelope, ManualClock, Script, ScriptedTransport};
use serde_json::json;

fn dispatcher_with(clock: Arc<ManualClock>) -> (Dispatcher, CacheReader) {
    let (writer, reader) = StateCache::new(500);
    (Dispatcher::new(writer, &SyncSettings::default(), clock), reader)
}

fn message(text: String) -> TransportEvent {
    TransportEvent::Message(InboundFrame::text(text))
}

#[tokio::test(start_paused = true)]
async fn test_snapshot_then_duplicate_transfer_through_client() {
    let snapshot = envelope(
        "full_state",
        json!({"hospitals": {"a": {"saturation": 0.9}, "b": {"saturation": 0.2}}}),
    );
    let transfer = envelope(
        "transfer",
        json!({"id": "evt-1", "origin": "a", "destination": "b", "urgency": "high"}),
    );
    let transport = Arc::new(ScriptedTransport::new(Script::OpenThen(vec![
        message(snapshot),
        message(transfer.clone()),
        message(transfer),
    ])));

    let handle = SyncClient::spawn(
        transport.clone(),
        "ws://localhost:8000/ws",
        &SyncSettings::default(),
        Arc::new(SystemClock),
    )
    .unwrap();
    let reader = handle.reader();
    let mut changes = reader.subscribe();
    changes
        .wait_for(|_| reader.transfer_count() == 1 && reader.hospital_count() == 2)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(reader.hospital("a").unwrap().saturation, 0.9);
    assert_eq!(reader.hospital("b").unwrap().saturation, 0.2);
    assert_eq!(reader.transfers().len(), 1);
    assert_eq!(reader.transfers()[0].id, "evt-1");
    assert_eq!(handle.stats().duplicates, 1);
    assert_eq!(reader.connection_status(), ConnectionStatus::Connected);
    handle.shutdown().await;
}

#[test]
fn test_distinct_ids_all_recorded() {
    let (mut dispatcher, reader) = dispatcher_with(Arc::new(ManualClock::new()));
    for i in 0..25 {
        dispatcher.handle_frame(&InboundFrame::text(envelope(
            "alert",
            json!({"id": format!("evt-{}", i), "origin": "a"}),
        )));
    }
    for i in 0..25 {
        dispatcher.handle_frame(&InboundFrame::text(envelope(
            "alert",
            json!({"id": format!("evt-{}", i), "origin": "a"}),
        )));
    }
    assert_eq!(reader.transfer_count(), 25);
    assert_eq!(dispatcher.stats().duplicates, 25);
}

#[test]
fn test_throttle_applies_first_and_third_of_burst() {
    let clock = Arc::new(ManualClock::new());
    let (mut dispatcher, reader) = dispatcher_with(clock.clone());
    let window = SyncSettings::default().throttle_window;
    let update = |s: f64| {
        InboundFrame::text(envelope(
            "hospital_update",
            json!({"hospital_id": "h", "saturation": s}),
        ))
    };

    let first = dispatcher.handle_frame(&update(0.1));
    clock.advance(window.mul_f64(0.1));
    let second = dispatcher.handle_frame(&update(0.2));
    clock.advance(window.mul_f64(1.4));
    let third = dispatcher.handle_frame(&update(0.3));

    assert_eq!((first.applied, second.applied, third.applied), (1, 0, 1));
    assert_eq!(reader.hospital("h").unwrap().saturation, 0.3);
}

#[test]
fn test_last_writer_wins_across_paths() {
    let clock = Arc::new(ManualClock::new());
    let (mut dispatcher, reader) = dispatcher_with(clock.clone());
    dispatcher.handle_frame(&InboundFrame::text(envelope(
        "full_state",
        json!({"hospitals": {"H": {"saturation": 0.4}}}),
    )));
    clock.advance(Duration::from_secs(5));
    dispatcher.handle_frame(&InboundFrame::text(envelope(
        "hospital_update",
        json!({"hospital_id": "H", "saturation": 0.7}),
    )));
    assert_eq!(reader.hospital("H").unwrap().saturation, 0.7);
    assert_eq!(reader.hospital("H").unwrap().updated_at, clock.wall());
}

#[tokio::test(start_paused = true)]
async fn test_malformed_input_changes_nothing() {
    let transport = Arc::new(ScriptedTransport::new(Script::Open));
    let handle = SyncClient::spawn(
        transport.clone(),
        "ws://localhost:8000/ws",
        &SyncSettings::default(),
        Arc::new(SystemClock),
    )
    .unwrap();
    handle
        .watch_state()
        .wait_for(|s| *s == ReconnectState::Connected)
        .await
        .unwrap();
    let reader = handle.reader();
    let before = reader.snapshot();

    for text in [
        "definitely not json".to_string(),
        envelope("hospital_update", json!({"hospital_id": "x", "queue_length": -3})),
        envelope("context_update", json!(["sunny"])),
    ] {
        assert!(transport.emit(message(text)));
    }
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(reader.snapshot(), before);
    assert_eq!(reader.connection_status(), ConnectionStatus::Connected);
    assert_eq!(handle.stats().decode_failures, 3);
    assert_eq!(handle.state(), ReconnectState::Connected);
    handle.shutdown().await;
}

#[test]
fn test_broker_topics_fan_into_one_cache() {
    let (mut dispatcher, reader) = dispatcher_with(Arc::new(ManualClock::new()));
    let frames = [
        InboundFrame::on_topic("hospitals/h-1/metrics", r#"{"occupied_beds": 30, "total_beds": 40}"#),
        InboundFrame::on_topic("hospitals/h-1/alerts", r#"{"id": "al-1", "reason": "icu full", "urgency": "critical"}"#),
        InboundFrame::on_topic("predictions/alerts/surge", r#"[{"id": "p-1"}, {"id": "p-2"}]"#),
        InboundFrame::on_topic("arrivals/h-1", r#"{"patient": 7, "context": {"event_load": 1.6}}"#),
        InboundFrame::on_topic("billing/h-1", r#"{}"#),
    ];
    for frame in &frames {
        dispatcher.handle_frame(frame);
    }

    assert_eq!(reader.hospital("h-1").unwrap().saturation, 0.75);
    assert_eq!(reader.transfer("al-1").unwrap().origin, "h-1");
    assert_eq!(reader.transfer("p-2").unwrap().origin, "prediction");
    assert_eq!(reader.context().event_load, 1.6);
    assert_eq!(dispatcher.stats().decode_failures, 1);
}

#[tokio::test]
async fn test_replay_recording_populates_cache() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(
        file,
        "{}",
        envelope("full_state", json!({"hospitals": {"north": {"saturation": 0.5}}, "context": {"weather": "rain"}}))
    )
    .unwrap();
    writeln!(file, r#"hospitals/south/metrics {{"saturation": 0.8}}"#).unwrap();
    writeln!(file, "{}", envelope("alert", json!({"id": "a-1", "origin": "north"}))).unwrap();
    file.flush().unwrap();

    let handle = SyncClient::spawn(
        Arc::new(ReplayTransport::default()),
        file.path().to_string_lossy().to_string(),
        &SyncSettings::default(),
        Arc::new(SystemClock),
    )
    .unwrap();
    let mut state = handle.watch_state();
    state.wait_for(|s| *s == ReconnectState::BackingOff).await.unwrap();

    let reader = handle.reader();
    assert_eq!(reader.hospital_count(), 2);
    assert_eq!(reader.context().weather.as_deref(), Some("rain"));
    assert_eq!(reader.transfer_count(), 1);
    assert_eq!(reader.connection_status(), ConnectionStatus::Disconnected);
    handle.shutdown().await;
}

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;

mod sync_logic;
use sync_logic::{config, monitor};

use lib_opsfeed::core::{ReconnectState, SystemClock, Transport};
use lib_opsfeed::ingestors::{ReplayTransport, WsTransport};
use lib_opsfeed::loggers;
use lib_opsfeed::{SyncClient, SyncClientHandle};

const APP_NAME: &str = "sync_client";

#[tokio::main]
async fn main() -> Result<()> {
    // Explicitly install the default crypto provider for rustls
    let _ = rustls::crypto::ring::default_provider().install_default();
    let _ = dotenvy::dotenv();

    let config = config::load_config().context("Failed to load configuration")?;
    let _log_guard = loggers::init_tracing(&config.log_dir(), config.log_level(), APP_NAME)
        .context("Failed to initialize logging")?;

    let settings = config.sync_settings();
    let endpoint = config.resolve_endpoint();
    let transport: Arc<dyn Transport> = match &config.replay {
        Some(_) => Arc::new(ReplayTransport::new(config.replay_pace())),
        None => Arc::new(WsTransport::from_settings(&settings)),
    };
    tracing::info!(endpoint = %endpoint, transport = transport.name(), "Starting sync client");

    let handle = SyncClient::spawn(transport, endpoint, &settings, Arc::new(SystemClock))
        .context("Invalid sync settings")?;

    let (shutdown_tx, _) = broadcast::channel(1);
    let monitor_handle = tokio::spawn(monitor::run(
        config.monitor_interval(),
        handle.reader(),
        handle.counters(),
        shutdown_tx.subscribe(),
    ));

    let replay_mode = config.replay.is_some();

    // Wait for shutdown signal, or for the recording to run out in replay mode
    tokio::select! {
        _ = signal::ctrl_c() => {
            tracing::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = terminate_signal() => {
            tracing::info!("SIGTERM received, initiating shutdown.");
        }
        _ = replay_finished(&handle), if replay_mode => {
            tracing::info!("Replay finished, initiating shutdown.");
        }
    }

    // Send shutdown signal to all components
    let _ = shutdown_tx.send(());
    let reader = handle.reader();
    handle.shutdown().await;
    let _ = monitor_handle.await;

    if replay_mode {
        let snapshot = reader.snapshot();
        println!(
            "{}",
            serde_json::to_string_pretty(&snapshot).context("Failed to serialize cache snapshot")?
        );
    }

    tracing::info!("Shutdown complete.");
    Ok(())
}

async fn terminate_signal() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term_signal) => {
                term_signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        // On non-unix platforms, just wait forever.
        std::future::pending::<()>().await;
    }
}

// A replay session ends with a normal close; the first time the client drops
// out of `Connected` the recording has been fully applied. A recording that
// never opens ends once the client gives up.
async fn replay_finished(handle: &SyncClientHandle) {
    let mut state = handle.watch_state();
    let reached = match state
        .wait_for(|s| matches!(s, ReconnectState::Connected | ReconnectState::Exhausted))
        .await
    {
        Ok(s) => *s,
        Err(_) => return,
    };
    if reached == ReconnectState::Connected {
        let _ = state.wait_for(|s| *s != ReconnectState::Connected).await;
    }
}

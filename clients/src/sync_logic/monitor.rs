use lib_opsfeed::core::{DispatchCounters, DispatchStats};
use lib_opsfeed::{CacheReader, ConnectionStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::interval;

/// Saturation at or above which a hospital is called out in reports.
pub const CRITICAL_SATURATION: f64 = 0.9;

/// One line of the periodic report.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub status: ConnectionStatus,
    pub hospitals: usize,
    pub transfers: usize,
    pub critical: Vec<String>,
    pub stats: DispatchStats,
}

pub fn build_report(reader: &CacheReader, counters: &DispatchCounters) -> Report {
    let snapshot = reader.snapshot();
    let critical = snapshot
        .hospitals
        .iter()
        .filter(|(_, state)| state.saturation >= CRITICAL_SATURATION || state.emergency)
        .map(|(id, _)| id.clone())
        .collect();
    Report {
        status: snapshot.status,
        hospitals: snapshot.hospitals.len(),
        transfers: snapshot.transfers.len(),
        critical,
        stats: counters.snapshot(),
    }
}

pub async fn run(
    every: Duration,
    reader: CacheReader,
    counters: Arc<DispatchCounters>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut check_interval = interval(every);

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("Monitor received shutdown signal.");
                break;
            }
            _ = check_interval.tick() => {
                let report = build_report(&reader, &counters);
                tracing::info!(
                    status = ?report.status,
                    hospitals = report.hospitals,
                    transfers = report.transfers,
                    applied = report.stats.applied,
                    throttled = report.stats.throttled,
                    duplicates = report.stats.duplicates,
                    decode_failures = report.stats.decode_failures,
                    "Cache report"
                );
                if !report.critical.is_empty() {
                    tracing::warn!(hospitals = ?report.critical, "Hospitals at critical load");
                }
                if report.status != ConnectionStatus::Connected {
                    tracing::debug!(status = ?report.status, "Feed not connected");
                }
            }
        }
    }
}

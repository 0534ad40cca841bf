//! # Envelope Dispatcher
//!
//! The `Dispatcher` sits between the decoder and the state cache. It owns the
//! only [`CacheWriter`] and every piece of private bookkeeping the pipeline
//! needs to decide whether a decoded message may touch the cache.
//!
//! ## Routing:
//!
//! 1.  **Snapshot** (`full_state`): fanned out into independent cache writes,
//!     one per hospital, plus a context merge. Snapshots are authoritative and
//!     bypass the throttle. Transfers embedded in a snapshot still go through
//!     deduplication, since snapshots repeat recent history.
//!
//! 2.  **Hospital update**: the continuous metric path. At most one update per
//!     hospital per throttle window is applied; the rest are dropped. An
//!     applied update only overwrites the fields it carries.
//!
//! 3.  **Context**: merged by field presence.
//!
//! 4.  **Transfers and alerts**: the discrete event path. Each event is admitted
//!     once by its identity key and then recorded immutably.
//!
//! 5.  **Unknown kinds**: counted and ignored.
//!
//! Decode failures are logged and counted, and never change the cache or the
//! connection status. Every outcome is tallied in [`DispatchCounters`] so an
//! operator can see what the pipeline is doing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::configs::SyncSettings;
use crate::core::clock::Clock;
use crate::core::dedup::DedupFilter;
use crate::core::envelope::{self, Envelope, HospitalUpdate, StatusSnapshot, TransferPayload};
use crate::core::model::{ConnectionStatus, ContextPatch};
use crate::core::state_cache::{CacheReader, CacheWriter};
use crate::core::throttle::UpdateThrottle;
use crate::core::transport::InboundFrame;

/// What a single dispatch did to the cache.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Cache writes performed.
    pub applied: usize,
    /// Hospital updates dropped inside their throttle window.
    pub throttled: usize,
    /// Events already admitted earlier.
    pub duplicates: usize,
    /// Messages of unknown kind, or empty patches.
    pub ignored: usize,
    /// Frames that failed to decode.
    pub rejected: usize,
}

/// # Dispatch Counters
///
/// Lifetime totals, shared with whoever wants to report them. Lock-free so the
/// monitor never contends with the pipeline.
#[derive(Debug, Default)]
pub struct DispatchCounters {
    messages: AtomicU64,
    applied: AtomicU64,
    throttled: AtomicU64,
    duplicates: AtomicU64,
    decode_failures: AtomicU64,
    ignored: AtomicU64,
}

impl DispatchCounters {
    fn record(&self, outcome: &DispatchOutcome) {
        self.messages.fetch_add(1, Ordering::Relaxed);
        self.applied.fetch_add(outcome.applied as u64, Ordering::Relaxed);
        self.throttled.fetch_add(outcome.throttled as u64, Ordering::Relaxed);
        self.duplicates.fetch_add(outcome.duplicates as u64, Ordering::Relaxed);
        self.decode_failures.fetch_add(outcome.rejected as u64, Ordering::Relaxed);
        self.ignored.fetch_add(outcome.ignored as u64, Ordering::Relaxed);
    }

    /// Point-in-time copy of the totals.
    pub fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            messages: self.messages.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
        }
    }
}

/// Plain copy of [`DispatchCounters`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    /// Frames handed to the dispatcher.
    pub messages: u64,
    /// Cache writes performed.
    pub applied: u64,
    /// Hospital updates dropped by the throttle.
    pub throttled: u64,
    /// Events suppressed as duplicates.
    pub duplicates: u64,
    /// Frames that failed to decode.
    pub decode_failures: u64,
    /// Unknown kinds and empty patches.
    pub ignored: u64,
}

/// # Core Dispatcher
///
/// Routes decoded envelopes into the state cache. Runs on the supervisor task;
/// never shared.
pub struct Dispatcher {
    writer: CacheWriter,
    dedup: DedupFilter,
    throttle: UpdateThrottle,
    clock: Arc<dyn Clock>,
    counters: Arc<DispatchCounters>,
}

impl Dispatcher {
    /// Creates a dispatcher that owns `writer`.
    pub fn new(writer: CacheWriter, settings: &SyncSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            writer,
            dedup: DedupFilter::new(settings.dedup_capacity, settings.dedup_ttl),
            throttle: UpdateThrottle::new(settings.throttle_window),
            clock,
            counters: Arc::new(DispatchCounters::default()),
        }
    }

    /// A read handle onto the cache this dispatcher writes.
    pub fn reader(&self) -> CacheReader {
        self.writer.reader()
    }

    /// Shared lifetime counters.
    pub fn counters(&self) -> Arc<DispatchCounters> {
        Arc::clone(&self.counters)
    }

    /// Current totals.
    pub fn stats(&self) -> DispatchStats {
        self.counters.snapshot()
    }

    /// Publishes a connection status change.
    pub fn set_connection_status(&mut self, status: ConnectionStatus) {
        self.writer.set_connection_status(status);
    }

    /// # Handle Frame
    ///
    /// Decodes one raw frame and dispatches it. A decode failure is logged at
    /// `warn` and dropped; nothing else happens.
    pub fn handle_frame(&mut self, frame: &InboundFrame) -> DispatchOutcome {
        let outcome = match envelope::decode_frame(frame) {
            Ok(envelope) => self.route(envelope),
            Err(e) => {
                tracing::warn!(topic = frame.topic.as_deref(), error = %e, "Dropping undecodable frame");
                DispatchOutcome {
                    rejected: 1,
                    ..DispatchOutcome::default()
                }
            }
        };
        self.counters.record(&outcome);
        outcome
    }

    /// Dispatches an already decoded envelope.
    pub fn dispatch(&mut self, envelope: Envelope) -> DispatchOutcome {
        let outcome = self.route(envelope);
        self.counters.record(&outcome);
        outcome
    }

    fn route(&mut self, envelope: Envelope) -> DispatchOutcome {
        match envelope {
            Envelope::Snapshot(snapshot) => self.apply_snapshot(snapshot),
            Envelope::HospitalUpdate(update) => self.apply_hospital_update(update),
            Envelope::Context(patch) => {
                let mut outcome = DispatchOutcome::default();
                self.apply_context(patch, &mut outcome);
                outcome
            }
            Envelope::Transfers(events) => {
                let mut outcome = DispatchOutcome::default();
                self.admit_transfers(events, &mut outcome);
                outcome
            }
            Envelope::Unknown(kind) => {
                tracing::debug!(kind = %kind, "Ignoring envelope of unknown kind");
                DispatchOutcome {
                    ignored: 1,
                    ..DispatchOutcome::default()
                }
            }
        }
    }

    fn apply_snapshot(&mut self, snapshot: StatusSnapshot) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        let received_at = self.clock.wall();

        if !snapshot.rejected_hospitals.is_empty() {
            tracing::warn!(
                rejected = snapshot.rejected_hospitals.len(),
                "Snapshot carried invalid hospital entries"
            );
        }
        if !snapshot.rejected_sections.is_empty() {
            tracing::warn!(
                sections = ?snapshot.rejected_sections,
                "Snapshot sections skipped; applying the rest"
            );
        }
        for (hospital_id, payload) in snapshot.hospitals {
            self.writer
                .set_hospital_state(hospital_id, payload.into_state(received_at));
            outcome.applied += 1;
        }
        if let Some(patch) = snapshot.context {
            self.apply_context(patch, &mut outcome);
        }
        self.admit_transfers(snapshot.transfers, &mut outcome);

        tracing::debug!(applied = outcome.applied, "Applied status snapshot");
        outcome
    }

    fn apply_hospital_update(&mut self, update: HospitalUpdate) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        if !self.throttle.should_apply(&update.hospital_id, self.clock.instant()) {
            tracing::trace!(hospital = %update.hospital_id, "Hospital update throttled");
            outcome.throttled = 1;
            return outcome;
        }
        let received_at = self.clock.wall();
        let state = match self.writer.hospital(&update.hospital_id) {
            Some(previous) => update.payload.merge_into(&previous, received_at),
            None => update.payload.into_state(received_at),
        };
        self.writer.set_hospital_state(update.hospital_id, state);
        outcome.applied = 1;
        outcome
    }

    fn apply_context(&mut self, patch: ContextPatch, outcome: &mut DispatchOutcome) {
        if self.writer.set_context(patch, self.clock.wall()) {
            outcome.applied += 1;
        } else {
            outcome.ignored += 1;
        }
    }

    fn admit_transfers(&mut self, events: Vec<TransferPayload>, outcome: &mut DispatchOutcome) {
        for payload in events {
            let key = payload.identity_key();
            if !self.dedup.admit(&key, self.clock.instant()) {
                tracing::debug!(event_id = %key, "Suppressing duplicate event");
                outcome.duplicates += 1;
                continue;
            }
            let event = payload.into_event(key, self.clock.wall());
            if self.writer.append_transfer_event(event) {
                outcome.applied += 1;
            } else {
                outcome.duplicates += 1;
            }
        }
    }
}

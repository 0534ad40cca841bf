//! # State Cache
//!
//! The canonical in-memory view of hospital state, external context, transfer
//! events and connection status.
//!
//! Writes and reads are split by type: [`StateCache::new`] hands out exactly one
//! [`CacheWriter`] (owned by the pipeline, not `Clone`) and a [`CacheReader`]
//! that presentation code may clone freely. Readers get copies and a revision
//! counter over `tokio::sync::watch` to know when to redraw; they never receive
//! a mutation handle.
//!
//! Mutations are last-writer-wins and infallible: a poisoned lock is recovered,
//! never propagated.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

use crate::core::model::{ConnectionStatus, ContextPatch, ExternalContext, HospitalState, TransferEvent};

#[derive(Debug, Default)]
struct CacheState {
    hospitals: HashMap<String, HospitalState>,
    context: ExternalContext,
    transfers: VecDeque<TransferEvent>,
    status: ConnectionStatus,
}

/// A serializable copy of the whole cache, for presentation code.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheSnapshot {
    /// Revision the copy was taken at.
    pub revision: u64,
    /// Connection status.
    pub status: ConnectionStatus,
    /// Hospitals sorted by id.
    pub hospitals: Vec<(String, HospitalState)>,
    /// External context.
    pub context: ExternalContext,
    /// Transfers, oldest first.
    pub transfers: Vec<TransferEvent>,
}

/// Constructor for the writer/reader pair.
pub struct StateCache;

impl StateCache {
    /// Creates an empty cache keeping at most `max_transfer_events` transfers.
    pub fn new(max_transfer_events: usize) -> (CacheWriter, CacheReader) {
        let inner = Arc::new(RwLock::new(CacheState::default()));
        let (revision_tx, revision_rx) = watch::channel(0u64);
        let writer = CacheWriter {
            inner: Arc::clone(&inner),
            revision: revision_tx,
            max_transfer_events: max_transfer_events.max(1),
        };
        let reader = CacheReader {
            inner,
            revision: revision_rx,
        };
        (writer, reader)
    }
}

/// The single mutation handle. Owned by the dispatch pipeline.
#[derive(Debug)]
pub struct CacheWriter {
    inner: Arc<RwLock<CacheState>>,
    revision: watch::Sender<u64>,
    max_transfer_events: usize,
}

impl CacheWriter {
    /// Replaces the state of one hospital.
    pub fn set_hospital_state(&mut self, hospital_id: impl Into<String>, state: HospitalState) {
        self.write().hospitals.insert(hospital_id.into(), state.normalized());
        self.bump();
    }

    /// Merges a context patch by field presence. Empty patches change nothing.
    pub fn set_context(&mut self, patch: ContextPatch, at: DateTime<Utc>) -> bool {
        let changed = self.write().context.apply(patch, at);
        if changed {
            self.bump();
        }
        changed
    }

    /// Records a transfer. An id already held is left untouched, since recorded
    /// events are immutable. Evicts the oldest event past the cap.
    pub fn append_transfer_event(&mut self, event: TransferEvent) -> bool {
        {
            let mut state = self.write();
            if state.transfers.iter().any(|e| e.id == event.id) {
                return false;
            }
            while state.transfers.len() >= self.max_transfer_events {
                state.transfers.pop_front();
            }
            state.transfers.push_back(event);
        }
        self.bump();
        true
    }

    /// Sets the connection status. Notifies readers only on change.
    pub fn set_connection_status(&mut self, status: ConnectionStatus) {
        let changed = {
            let mut state = self.write();
            let changed = state.status != status;
            state.status = status;
            changed
        };
        if changed {
            self.bump();
        }
    }

    /// Cached state of one hospital, for merging partial updates.
    pub fn hospital(&self, hospital_id: &str) -> Option<HospitalState> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .hospitals
            .get(hospital_id)
            .cloned()
    }

    /// A new read handle onto the same cache.
    pub fn reader(&self) -> CacheReader {
        CacheReader {
            inner: Arc::clone(&self.inner),
            revision: self.revision.subscribe(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump(&self) {
        self.revision.send_modify(|rev| *rev += 1);
    }
}

/// Read-only access to the cache. Cheap to clone.
#[derive(Debug, Clone)]
pub struct CacheReader {
    inner: Arc<RwLock<CacheState>>,
    revision: watch::Receiver<u64>,
}

impl CacheReader {
    /// State of one hospital.
    pub fn hospital(&self, hospital_id: &str) -> Option<HospitalState> {
        self.read().hospitals.get(hospital_id).cloned()
    }

    /// All hospital states.
    pub fn hospitals(&self) -> HashMap<String, HospitalState> {
        self.read().hospitals.clone()
    }

    /// Number of hospitals with a live state.
    pub fn hospital_count(&self) -> usize {
        self.read().hospitals.len()
    }

    /// Current external context.
    pub fn context(&self) -> ExternalContext {
        self.read().context.clone()
    }

    /// Transfers, oldest first.
    pub fn transfers(&self) -> Vec<TransferEvent> {
        self.read().transfers.iter().cloned().collect()
    }

    /// One transfer by id.
    pub fn transfer(&self, id: &str) -> Option<TransferEvent> {
        self.read().transfers.iter().find(|e| e.id == id).cloned()
    }

    /// Number of recorded transfers.
    pub fn transfer_count(&self) -> usize {
        self.read().transfers.len()
    }

    /// Connection status.
    pub fn connection_status(&self) -> ConnectionStatus {
        self.read().status
    }

    /// Current revision. Grows by one per effective mutation.
    pub fn revision(&self) -> u64 {
        *self.revision.borrow()
    }

    /// Change notifications for redraw loops.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.revision.clone()
    }

    /// Consistent copy of everything.
    pub fn snapshot(&self) -> CacheSnapshot {
        let revision = self.revision();
        let state = self.read();
        let mut hospitals: Vec<(String, HospitalState)> = state
            .hospitals
            .iter()
            .map(|(id, s)| (id.clone(), s.clone()))
            .collect();
        hospitals.sort_by(|a, b| a.0.cmp(&b.0));
        CacheSnapshot {
            revision,
            status: state.status,
            hospitals,
            context: state.context.clone(),
            transfers: state.transfers.iter().cloned().collect(),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheState> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }
}

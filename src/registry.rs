use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::manager::RangeSnapshotSource;
use crate::range::{PersistedRangeSnapshot, PersistedRangeTracker, RangeError};
use crate::stream::StreamDescriptor;

/// Shared catalog of per-stream range trackers.
///
/// Persistence tasks update their stream's tracker through a cloned handle
/// while the coordinating flow flushes against the same registry; readers
/// always get owned snapshots, so a flush never observes a half-applied
/// range merge.
#[derive(Debug, Clone, Default)]
pub struct TrackerRegistry {
    inner: Arc<RwLock<BTreeMap<StreamDescriptor, PersistedRangeTracker>>>,
}

impl TrackerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a stream with a fresh tracker; no-op if already present.
    pub fn register(&self, stream: StreamDescriptor) {
        self.inner.write().entry(stream).or_default();
    }

    /// Records `count` ingested records for `stream`, registering it first
    /// if needed.
    pub fn add_records(&self, stream: &StreamDescriptor, count: u64) {
        self.inner
            .write()
            .entry(stream.clone())
            .or_default()
            .add_records(count);
    }

    /// Merges a newly durable closed interval into `stream`'s tracker,
    /// registering it first if needed.
    pub fn add_persisted_range(
        &self,
        stream: &StreamDescriptor,
        start: u64,
        end: u64,
    ) -> Result<(), RangeError> {
        self.inner
            .write()
            .entry(stream.clone())
            .or_default()
            .add_persisted_range(start, end)
    }

    /// Ingested-record count for `stream`, if registered.
    pub fn record_count(&self, stream: &StreamDescriptor) -> Option<u64> {
        self.inner
            .read()
            .get(stream)
            .map(|tracker| tracker.record_count())
    }

    /// Streams currently registered.
    pub fn streams(&self) -> Vec<StreamDescriptor> {
        self.inner.read().keys().cloned().collect()
    }
}

impl RangeSnapshotSource for TrackerRegistry {
    fn snapshot(&self, stream: &StreamDescriptor) -> Option<PersistedRangeSnapshot> {
        self.inner
            .read()
            .get(stream)
            .map(|tracker| tracker.snapshot())
    }
}

use parking_lot::Mutex;
use std::sync::Arc;

use serde_json::Value;

use crate::convert::CheckpointConverter;
use crate::manager::{
    CheckpointError, CheckpointManager, CheckpointMode, FlushReport, ManagerTelemetry,
    RangeSnapshotSource,
};
use crate::sink::OutputSink;
use crate::stream::StreamDescriptor;

/// Cloneable handle to a [`CheckpointManager`] shared across concurrent
/// callers.
///
/// The whole manager sits behind one mutex, so the mode check-and-set is
/// atomic (two racing first-adds deterministically fix exactly one mode and
/// fail the other), and per-stream monotonicity checks are atomic with their
/// updates. Every operation is a bounded in-memory computation, so the lock
/// is held only briefly.
pub struct SharedCheckpointManager<R, C, S> {
    inner: Arc<Mutex<CheckpointManager<R, C, S>>>,
}

impl<R, C, S> Clone for SharedCheckpointManager<R, C, S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R, C, S> SharedCheckpointManager<R, C, S>
where
    R: RangeSnapshotSource,
    C: CheckpointConverter,
    S: OutputSink,
{
    pub fn new(manager: CheckpointManager<R, C, S>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(manager)),
        }
    }

    /// See [`CheckpointManager::add_stream_checkpoint`].
    pub fn add_stream_checkpoint(
        &self,
        stream: StreamDescriptor,
        index: u64,
        state: Value,
    ) -> Result<(), CheckpointError> {
        self.inner.lock().add_stream_checkpoint(stream, index, state)
    }

    /// See [`CheckpointManager::add_global_checkpoint`].
    pub fn add_global_checkpoint(
        &self,
        stream_indexes: Vec<(StreamDescriptor, u64)>,
        state: Value,
    ) -> Result<(), CheckpointError> {
        self.inner.lock().add_global_checkpoint(stream_indexes, state)
    }

    /// See [`CheckpointManager::flush_ready_checkpoints`].
    pub fn flush_ready_checkpoints(&self) -> Result<FlushReport, CheckpointError> {
        self.inner.lock().flush_ready_checkpoints()
    }

    pub fn mode(&self) -> CheckpointMode {
        self.inner.lock().mode()
    }

    pub fn pending_checkpoints(&self) -> u64 {
        self.inner.lock().pending_checkpoints()
    }

    pub fn telemetry(&self) -> ManagerTelemetry {
        self.inner.lock().telemetry()
    }

    /// Runs `f` with exclusive access to the manager (e.g. to drain a
    /// buffered sink in one critical section with a flush).
    pub fn with_manager<T>(&self, f: impl FnOnce(&mut CheckpointManager<R, C, S>) -> T) -> T {
        f(&mut self.inner.lock())
    }
}

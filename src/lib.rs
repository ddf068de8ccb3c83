//! Checkpoint coordination core for batched data-movement pipelines.
//!
//! A protocol source interleaves data records with checkpoint messages; a
//! checkpoint promises that everything up to a record index has been seen
//! and may only be acknowledged once that data is durably persisted at the
//! destination. The [`CheckpointManager`] reconciles the three signals
//! involved (records read, ranges persisted, checkpoints pending) while
//! enforcing the ordering and mode-exclusivity invariants that exactly-once
//! delivery rests on.

pub mod convert;
pub mod manager;
pub mod range;
pub mod registry;
pub mod shared;
pub mod sink;
pub mod stream;

pub use convert::{
    CheckpointConverter, ConversionError, EnvelopeConverter, OutputCheckpoint, RawCheckpoint,
};
pub use manager::{
    CheckpointError, CheckpointManager, CheckpointMode, FlushReport, ManagerTelemetry,
    RangeSnapshotSource,
};
pub use range::{ClosedRange, PersistedRangeSnapshot, PersistedRangeTracker, RangeError};
pub use registry::TrackerRegistry;
pub use shared::SharedCheckpointManager;
pub use sink::{BufferedSink, OutputSink, SinkError};
pub use stream::StreamDescriptor;

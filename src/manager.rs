use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use thiserror::Error;

use serde_json::Value;

use crate::convert::{CheckpointConverter, ConversionError, OutputCheckpoint, RawCheckpoint};
use crate::range::{PersistedRangeSnapshot, PersistedRangeTracker};
use crate::sink::{OutputSink, SinkError};
use crate::stream::StreamDescriptor;

/// Accessor handle the manager uses to read per-stream persisted-range
/// snapshots at flush time. `None` means the stream is unknown to the
/// tracker catalog, which gates a flush the same way zero coverage does.
pub trait RangeSnapshotSource {
    fn snapshot(&self, stream: &StreamDescriptor) -> Option<PersistedRangeSnapshot>;
}

impl RangeSnapshotSource for BTreeMap<StreamDescriptor, PersistedRangeTracker> {
    fn snapshot(&self, stream: &StreamDescriptor) -> Option<PersistedRangeSnapshot> {
        self.get(stream).map(|tracker| tracker.snapshot())
    }
}

/// Checkpoint tracking style, fixed permanently by the first successful add.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointMode {
    Unset,
    PerStream,
    Global,
}

impl fmt::Display for CheckpointMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CheckpointMode::Unset => "unset",
            CheckpointMode::PerStream => "per-stream",
            CheckpointMode::Global => "global",
        })
    }
}

/// Failure taxonomy for checkpoint coordination.
///
/// `ModeConflict` and `OutOfOrder` are contract violations by the protocol
/// source, raised synchronously at add-time and never retried; the
/// surrounding sync run is expected to abort. A failed add commits no
/// partial state.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint mode is {established}, cannot add a {requested} checkpoint")]
    ModeConflict {
        established: CheckpointMode,
        requested: CheckpointMode,
    },
    #[error("out-of-order checkpoint for {stream}: index {index} is not greater than {last_index}")]
    OutOfOrder {
        stream: StreamDescriptor,
        index: u64,
        last_index: u64,
    },
    #[error(transparent)]
    Conversion(#[from] ConversionError),
    #[error(transparent)]
    Sink(#[from] SinkError),
}

/// Per-stream pending entry: `index` is the exclusive upper bound of records
/// the checkpoint certifies as seen.
#[derive(Debug, Clone)]
struct PendingStreamCheckpoint {
    index: u64,
    converted: OutputCheckpoint,
}

/// Global pending entry spanning several streams at once.
#[derive(Debug, Clone)]
struct PendingGlobalCheckpoint {
    stream_indexes: Vec<(StreamDescriptor, u64)>,
    converted: OutputCheckpoint,
}

/// Outcome of a flush pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    /// Checkpoints handed to the sink during this pass.
    pub emitted: u64,
    /// Checkpoints still pending after this pass.
    pub remaining: u64,
}

/// Telemetry snapshot for publishing alongside pipeline metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerTelemetry {
    pub mode: CheckpointMode,
    pub pending_streams: usize,
    pub pending_checkpoints: u64,
    pub emitted_total: u64,
}

/// Coordinates checkpoint acknowledgement against durable persistence.
///
/// The manager buffers pending checkpoints (per-stream or global, never
/// both), enforces strict per-stream index monotonicity, and releases an
/// entry to the sink only once the persisted-range snapshots confirm every
/// record range it summarizes. Collaborators are injected at construction;
/// the manager itself performs no blocking I/O and never suspends.
pub struct CheckpointManager<R, C, S> {
    ranges: R,
    converter: C,
    sink: S,
    mode: CheckpointMode,
    last_index: BTreeMap<StreamDescriptor, u64>,
    stream_queues: BTreeMap<StreamDescriptor, VecDeque<PendingStreamCheckpoint>>,
    global_queue: VecDeque<PendingGlobalCheckpoint>,
    emitted_total: u64,
}

impl<R, C, S> CheckpointManager<R, C, S>
where
    R: RangeSnapshotSource,
    C: CheckpointConverter,
    S: OutputSink,
{
    /// Creates a manager with injected range-snapshot source, converter, and
    /// sink; lifecycle is scoped to one sync run.
    pub fn new(ranges: R, converter: C, sink: S) -> Self {
        Self {
            ranges,
            converter,
            sink,
            mode: CheckpointMode::Unset,
            last_index: BTreeMap::new(),
            stream_queues: BTreeMap::new(),
            global_queue: VecDeque::new(),
            emitted_total: 0,
        }
    }

    /// Buffers a per-stream checkpoint certifying that records `[0, index)`
    /// of `stream` have been seen. Converts eagerly; performs no sink I/O.
    pub fn add_stream_checkpoint(
        &mut self,
        stream: StreamDescriptor,
        index: u64,
        state: Value,
    ) -> Result<(), CheckpointError> {
        if self.mode == CheckpointMode::Global {
            return Err(CheckpointError::ModeConflict {
                established: self.mode,
                requested: CheckpointMode::PerStream,
            });
        }
        if let Some(&last_index) = self.last_index.get(&stream) {
            if index <= last_index {
                return Err(CheckpointError::OutOfOrder {
                    stream,
                    index,
                    last_index,
                });
            }
        }
        let converted = self.converter.convert(&RawCheckpoint::Stream {
            stream: stream.clone(),
            state,
        })?;
        self.last_index.insert(stream.clone(), index);
        self.stream_queues
            .entry(stream)
            .or_default()
            .push_back(PendingStreamCheckpoint { index, converted });
        self.mode = CheckpointMode::PerStream;
        Ok(())
    }

    /// Buffers a global checkpoint spanning every `(stream, index)` pair in
    /// `stream_indexes`. Validation is all-or-nothing: if any pair violates
    /// strict monotonicity (including against an earlier pair in the same
    /// call), the whole call fails and no state is committed.
    pub fn add_global_checkpoint(
        &mut self,
        stream_indexes: Vec<(StreamDescriptor, u64)>,
        state: Value,
    ) -> Result<(), CheckpointError> {
        if self.mode == CheckpointMode::PerStream {
            return Err(CheckpointError::ModeConflict {
                established: self.mode,
                requested: CheckpointMode::Global,
            });
        }
        let mut staged: BTreeMap<&StreamDescriptor, u64> = BTreeMap::new();
        for (stream, index) in &stream_indexes {
            let effective = staged
                .get(stream)
                .copied()
                .or_else(|| self.last_index.get(stream).copied());
            if let Some(last_index) = effective {
                if *index <= last_index {
                    return Err(CheckpointError::OutOfOrder {
                        stream: stream.clone(),
                        index: *index,
                        last_index,
                    });
                }
            }
            staged.insert(stream, *index);
        }
        let converted = self.converter.convert(&RawCheckpoint::Global { state })?;
        for (stream, index) in &stream_indexes {
            self.last_index.insert(stream.clone(), *index);
        }
        self.global_queue.push_back(PendingGlobalCheckpoint {
            stream_indexes,
            converted,
        });
        self.mode = CheckpointMode::Global;
        Ok(())
    }

    /// Emits every pending checkpoint whose summarized record ranges are now
    /// fully persisted, preserving FIFO order.
    ///
    /// Per-stream queues flush independently, each stopping at its first
    /// unready entry. The global queue stops at the first entry with any
    /// uncovered stream, even if a later entry happens to be coverable:
    /// coverage is stream-local and the global order must hold across
    /// streams with independent persistence rates.
    ///
    /// Entries are popped only after the sink accepts them; a sink failure
    /// leaves the offending entry at the front for a later flush to retry.
    pub fn flush_ready_checkpoints(&mut self) -> Result<FlushReport, CheckpointError> {
        let mut emitted = 0u64;
        for (stream, queue) in self.stream_queues.iter_mut() {
            let Some(snapshot) = self.ranges.snapshot(stream) else {
                continue;
            };
            while let Some(front) = queue.front() {
                if !snapshot.covers_prefix(front.index) {
                    break;
                }
                self.sink.accept(front.converted.clone())?;
                queue.pop_front();
                emitted += 1;
            }
        }
        while let Some(front) = self.global_queue.front() {
            let all_covered = front.stream_indexes.iter().all(|(stream, index)| {
                self.ranges
                    .snapshot(stream)
                    .is_some_and(|snapshot| snapshot.covers_prefix(*index))
            });
            if !all_covered {
                break;
            }
            self.sink.accept(front.converted.clone())?;
            self.global_queue.pop_front();
            emitted += 1;
        }
        self.emitted_total += emitted;
        Ok(FlushReport {
            emitted,
            remaining: self.pending_checkpoints(),
        })
    }

    /// Current tracking mode.
    pub fn mode(&self) -> CheckpointMode {
        self.mode
    }

    /// Highest index successfully added for `stream`, across both modes.
    pub fn last_index(&self, stream: &StreamDescriptor) -> Option<u64> {
        self.last_index.get(stream).copied()
    }

    /// Total pending checkpoints across all queues.
    pub fn pending_checkpoints(&self) -> u64 {
        let per_stream: u64 = self
            .stream_queues
            .values()
            .map(|queue| queue.len() as u64)
            .sum();
        per_stream + self.global_queue.len() as u64
    }

    /// Telemetry snapshot for metrics publication.
    pub fn telemetry(&self) -> ManagerTelemetry {
        ManagerTelemetry {
            mode: self.mode,
            pending_streams: self
                .stream_queues
                .values()
                .filter(|queue| !queue.is_empty())
                .count(),
            pending_checkpoints: self.pending_checkpoints(),
            emitted_total: self.emitted_total,
        }
    }

    /// Access to the injected sink (e.g. to drain a [`BufferedSink`]).
    ///
    /// [`BufferedSink`]: crate::sink::BufferedSink
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }
}

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::json;
use syncpoint::{
    CheckpointError, CheckpointManager, CheckpointMode, EnvelopeConverter, OutputCheckpoint,
    OutputSink, SinkError, StreamDescriptor, TrackerRegistry,
};

#[derive(Clone, Default)]
struct RecordingSink {
    accepted: Rc<RefCell<Vec<OutputCheckpoint>>>,
}

impl RecordingSink {
    fn handle(&self) -> Rc<RefCell<Vec<OutputCheckpoint>>> {
        self.accepted.clone()
    }
}

impl OutputSink for RecordingSink {
    fn accept(&mut self, checkpoint: OutputCheckpoint) -> Result<(), SinkError> {
        self.accepted.borrow_mut().push(checkpoint);
        Ok(())
    }
}

type Manager = CheckpointManager<TrackerRegistry, EnvelopeConverter, RecordingSink>;

fn setup() -> (TrackerRegistry, Manager, Rc<RefCell<Vec<OutputCheckpoint>>>) {
    let registry = TrackerRegistry::new();
    let sink = RecordingSink::default();
    let handle = sink.handle();
    let manager = CheckpointManager::new(registry.clone(), EnvelopeConverter, sink);
    (registry, manager, handle)
}

fn cursors(emitted: &[OutputCheckpoint]) -> Vec<u64> {
    emitted
        .iter()
        .map(|checkpoint| checkpoint.message()["state"]["cursor"].as_u64().expect("cursor"))
        .collect()
}

#[test]
fn flushes_fully_covered_checkpoints_in_order() {
    let (registry, mut manager, emitted) = setup();
    let stream = StreamDescriptor::unnamespaced("s1");
    manager
        .add_stream_checkpoint(stream.clone(), 10, json!({"cursor": 1}))
        .expect("first checkpoint");
    manager
        .add_stream_checkpoint(stream.clone(), 20, json!({"cursor": 2}))
        .expect("second checkpoint");
    registry
        .add_persisted_range(&stream, 0, 20)
        .expect("persisted range");

    let report = manager.flush_ready_checkpoints().expect("flush");
    assert_eq!(report.emitted, 2);
    assert_eq!(report.remaining, 0);
    assert_eq!(cursors(&emitted.borrow()), vec![1, 2]);
}

#[test]
fn holds_back_checkpoints_past_persisted_coverage() {
    let (registry, mut manager, emitted) = setup();
    let stream = StreamDescriptor::unnamespaced("s1");
    manager
        .add_stream_checkpoint(stream.clone(), 10, json!({"cursor": 1}))
        .expect("first checkpoint");
    manager
        .add_stream_checkpoint(stream.clone(), 20, json!({"cursor": 2}))
        .expect("second checkpoint");
    registry
        .add_persisted_range(&stream, 0, 10)
        .expect("partial range");

    let report = manager.flush_ready_checkpoints().expect("flush");
    assert_eq!(report.emitted, 1);
    assert_eq!(report.remaining, 1);
    assert_eq!(cursors(&emitted.borrow()), vec![1]);

    // Once the rest of the data is durable, the held entry drains.
    registry
        .add_persisted_range(&stream, 11, 19)
        .expect("remaining range");
    let report = manager.flush_ready_checkpoints().expect("second flush");
    assert_eq!(report.emitted, 1);
    assert_eq!(cursors(&emitted.borrow()), vec![1, 2]);
}

#[test]
fn emits_nothing_when_coverage_has_a_gap_at_zero() {
    let (registry, mut manager, emitted) = setup();
    let stream = StreamDescriptor::unnamespaced("s1");
    manager
        .add_stream_checkpoint(stream.clone(), 10, json!({"cursor": 1}))
        .expect("first checkpoint");
    manager
        .add_stream_checkpoint(stream.clone(), 20, json!({"cursor": 2}))
        .expect("second checkpoint");
    registry
        .add_persisted_range(&stream, 10, 20)
        .expect("offset range");

    let report = manager.flush_ready_checkpoints().expect("flush");
    assert_eq!(report.emitted, 0);
    assert_eq!(report.remaining, 2);
    assert!(emitted.borrow().is_empty());
}

#[test]
fn rejects_non_monotonic_indices_at_add_time() {
    let (_registry, mut manager, _emitted) = setup();
    let stream = StreamDescriptor::unnamespaced("s1");
    manager
        .add_stream_checkpoint(stream.clone(), 20, json!({"cursor": 1}))
        .expect("first checkpoint");

    let err = manager
        .add_stream_checkpoint(stream.clone(), 10, json!({"cursor": 2}))
        .expect_err("regression rejected");
    assert!(matches!(
        err,
        CheckpointError::OutOfOrder {
            index: 10,
            last_index: 20,
            ..
        }
    ));

    // Equal index is also out of order; strictly-greater is required.
    let err = manager
        .add_stream_checkpoint(stream.clone(), 20, json!({"cursor": 3}))
        .expect_err("duplicate rejected");
    assert!(matches!(err, CheckpointError::OutOfOrder { .. }));
    assert_eq!(manager.pending_checkpoints(), 1);
}

#[test]
fn per_stream_mode_rejects_global_checkpoints() {
    let (_registry, mut manager, _emitted) = setup();
    let stream = StreamDescriptor::unnamespaced("s1");
    manager
        .add_stream_checkpoint(stream.clone(), 10, json!({"cursor": 1}))
        .expect("stream checkpoint");
    assert_eq!(manager.mode(), CheckpointMode::PerStream);

    let err = manager
        .add_global_checkpoint(vec![(stream, 20)], json!({"cursor": 2}))
        .expect_err("mode conflict");
    assert!(matches!(
        err,
        CheckpointError::ModeConflict {
            established: CheckpointMode::PerStream,
            requested: CheckpointMode::Global,
        }
    ));
}

#[test]
fn mode_stays_fixed_across_flushes() {
    let (registry, mut manager, _emitted) = setup();
    let stream = StreamDescriptor::unnamespaced("s1");
    manager
        .add_stream_checkpoint(stream.clone(), 10, json!({"cursor": 1}))
        .expect("stream checkpoint");
    registry
        .add_persisted_range(&stream, 0, 9)
        .expect("persisted range");
    manager.flush_ready_checkpoints().expect("flush");
    assert_eq!(manager.pending_checkpoints(), 0);

    let err = manager
        .add_global_checkpoint(vec![(stream, 20)], json!({"cursor": 2}))
        .expect_err("mode conflict after drain");
    assert!(matches!(err, CheckpointError::ModeConflict { .. }));
}

#[test]
fn conversion_failure_commits_nothing() {
    let (_registry, mut manager, _emitted) = setup();
    let stream = StreamDescriptor::unnamespaced("s1");
    let err = manager
        .add_stream_checkpoint(stream.clone(), 10, json!("not an object"))
        .expect_err("conversion rejected");
    assert!(matches!(err, CheckpointError::Conversion(_)));
    assert_eq!(manager.mode(), CheckpointMode::Unset);
    assert_eq!(manager.last_index(&stream), None);
    assert_eq!(manager.pending_checkpoints(), 0);

    // The same index is still usable after the failed call.
    manager
        .add_stream_checkpoint(stream, 10, json!({"cursor": 1}))
        .expect("retry with valid state");
}

#[test]
fn flush_is_a_noop_on_empty_queues_and_idempotent() {
    let (registry, mut manager, emitted) = setup();
    let stream = StreamDescriptor::unnamespaced("s1");

    let report = manager.flush_ready_checkpoints().expect("empty flush");
    assert_eq!(report.emitted, 0);

    manager
        .add_stream_checkpoint(stream.clone(), 10, json!({"cursor": 1}))
        .expect("checkpoint");
    registry
        .add_persisted_range(&stream, 0, 9)
        .expect("persisted range");
    assert_eq!(manager.flush_ready_checkpoints().expect("flush").emitted, 1);
    assert_eq!(
        manager
            .flush_ready_checkpoints()
            .expect("re-flush")
            .emitted,
        0
    );
    assert_eq!(emitted.borrow().len(), 1);
}

#[test]
fn unregistered_streams_stay_pending() {
    let (_registry, mut manager, emitted) = setup();
    let stream = StreamDescriptor::unnamespaced("s1");
    manager
        .add_stream_checkpoint(stream, 10, json!({"cursor": 1}))
        .expect("checkpoint");

    let report = manager.flush_ready_checkpoints().expect("flush");
    assert_eq!(report.emitted, 0);
    assert_eq!(report.remaining, 1);
    assert!(emitted.borrow().is_empty());
}

#[test]
fn streams_flush_independently() {
    let (registry, mut manager, emitted) = setup();
    let s1 = StreamDescriptor::new("public", "s1");
    let s2 = StreamDescriptor::new("public", "s2");
    manager
        .add_stream_checkpoint(s1.clone(), 10, json!({"cursor": 1}))
        .expect("s1 checkpoint");
    manager
        .add_stream_checkpoint(s2.clone(), 10, json!({"cursor": 2}))
        .expect("s2 checkpoint");
    registry
        .add_persisted_range(&s2, 0, 9)
        .expect("s2 persisted");

    let report = manager.flush_ready_checkpoints().expect("flush");
    assert_eq!(report.emitted, 1);
    assert_eq!(cursors(&emitted.borrow()), vec![2]);
    assert_eq!(manager.pending_checkpoints(), 1);
}

#[test]
fn telemetry_reflects_queue_state() {
    let (registry, mut manager, _emitted) = setup();
    let stream = StreamDescriptor::unnamespaced("s1");
    manager
        .add_stream_checkpoint(stream.clone(), 10, json!({"cursor": 1}))
        .expect("first checkpoint");
    manager
        .add_stream_checkpoint(stream.clone(), 20, json!({"cursor": 2}))
        .expect("second checkpoint");

    let telemetry = manager.telemetry();
    assert_eq!(telemetry.mode, CheckpointMode::PerStream);
    assert_eq!(telemetry.pending_streams, 1);
    assert_eq!(telemetry.pending_checkpoints, 2);
    assert_eq!(telemetry.emitted_total, 0);

    registry
        .add_persisted_range(&stream, 0, 19)
        .expect("persisted range");
    manager.flush_ready_checkpoints().expect("flush");
    let telemetry = manager.telemetry();
    assert_eq!(telemetry.pending_streams, 0);
    assert_eq!(telemetry.pending_checkpoints, 0);
    assert_eq!(telemetry.emitted_total, 2);
}

struct FlakySink {
    inner: RecordingSink,
    fail_next: bool,
}

impl OutputSink for FlakySink {
    fn accept(&mut self, checkpoint: OutputCheckpoint) -> Result<(), SinkError> {
        if self.fail_next {
            self.fail_next = false;
            return Err(SinkError::Deliver("transport stalled".into()));
        }
        self.inner.accept(checkpoint)
    }
}

#[test]
fn sink_failure_leaves_entry_queued_for_retry() {
    let registry = TrackerRegistry::new();
    let recording = RecordingSink::default();
    let handle = recording.handle();
    let sink = FlakySink {
        inner: recording,
        fail_next: true,
    };
    let mut manager = CheckpointManager::new(registry.clone(), EnvelopeConverter, sink);
    let stream = StreamDescriptor::unnamespaced("s1");
    manager
        .add_stream_checkpoint(stream.clone(), 10, json!({"cursor": 1}))
        .expect("checkpoint");
    registry
        .add_persisted_range(&stream, 0, 9)
        .expect("persisted range");

    let err = manager
        .flush_ready_checkpoints()
        .expect_err("sink failure propagates");
    assert!(matches!(err, CheckpointError::Sink(_)));
    assert_eq!(manager.pending_checkpoints(), 1);
    assert!(handle.borrow().is_empty());

    let report = manager.flush_ready_checkpoints().expect("retry flush");
    assert_eq!(report.emitted, 1);
    assert_eq!(cursors(&handle.borrow()), vec![1]);
}

use std::collections::VecDeque;
use thiserror::Error;

use crate::convert::OutputCheckpoint;

/// Error surfaced when a sink cannot take delivery of a checkpoint.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("checkpoint delivery failed: {0}")]
    Deliver(String),
}

/// Contract implemented by checkpoint consumers (e.g. the destination-facing
/// message writer). `accept` is invoked exactly once per emitted checkpoint,
/// in emission order; the sink's own buffering and transport are out of scope.
pub trait OutputSink {
    fn accept(&mut self, checkpoint: OutputCheckpoint) -> Result<(), SinkError>;
}

/// In-memory sink that buffers accepted checkpoints until drained.
#[derive(Debug, Clone, Default)]
pub struct BufferedSink {
    accepted: VecDeque<OutputCheckpoint>,
}

impl BufferedSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of checkpoints buffered.
    pub fn len(&self) -> usize {
        self.accepted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty()
    }

    /// Removes and returns all buffered checkpoints in acceptance order.
    pub fn drain(&mut self) -> Vec<OutputCheckpoint> {
        self.accepted.drain(..).collect()
    }
}

impl OutputSink for BufferedSink {
    fn accept(&mut self, checkpoint: OutputCheckpoint) -> Result<(), SinkError> {
        self.accepted.push_back(checkpoint);
        Ok(())
    }
}

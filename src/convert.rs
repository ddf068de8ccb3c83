use serde_json::{json, Value};
use thiserror::Error;

use crate::stream::StreamDescriptor;

/// Raw checkpoint payload as handed over by the protocol layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawCheckpoint {
    Stream {
        stream: StreamDescriptor,
        state: Value,
    },
    Global {
        state: Value,
    },
}

/// Output-ready checkpoint message produced by conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputCheckpoint {
    Stream {
        stream: StreamDescriptor,
        message: Value,
    },
    Global {
        message: Value,
    },
}

impl OutputCheckpoint {
    /// The converted message body, regardless of variant.
    pub fn message(&self) -> &Value {
        match self {
            OutputCheckpoint::Stream { message, .. } => message,
            OutputCheckpoint::Global { message } => message,
        }
    }
}

/// Error surfaced when a raw checkpoint cannot be converted.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("checkpoint state is not a JSON object: {got}")]
    InvalidState { got: &'static str },
}

/// Pure mapping from raw checkpoint payloads to output-ready messages.
///
/// Conversion happens eagerly when a checkpoint is added, never at flush
/// time, and must be side-effect free; failures propagate synchronously to
/// the `add_*` caller.
pub trait CheckpointConverter {
    fn convert(&self, raw: &RawCheckpoint) -> Result<OutputCheckpoint, ConversionError>;
}

/// Stock converter that wraps the raw state into the downstream JSON
/// envelope, preserving the stream/global discriminant.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvelopeConverter;

impl CheckpointConverter for EnvelopeConverter {
    fn convert(&self, raw: &RawCheckpoint) -> Result<OutputCheckpoint, ConversionError> {
        match raw {
            RawCheckpoint::Stream { stream, state } => {
                ensure_object(state)?;
                let message = json!({
                    "type": "STREAM",
                    "stream": {
                        "namespace": &stream.namespace,
                        "name": &stream.name,
                    },
                    "state": state,
                });
                Ok(OutputCheckpoint::Stream {
                    stream: stream.clone(),
                    message,
                })
            }
            RawCheckpoint::Global { state } => {
                ensure_object(state)?;
                let message = json!({
                    "type": "GLOBAL",
                    "state": state,
                });
                Ok(OutputCheckpoint::Global { message })
            }
        }
    }
}

fn ensure_object(state: &Value) -> Result<(), ConversionError> {
    if state.is_object() {
        Ok(())
    } else {
        Err(ConversionError::InvalidState {
            got: json_type_name(state),
        })
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

//! Stream events delivered by a chain transport.
//!
//! Transports that talk to a live chain produce `StreamEvent`s directly.
//! Recorded streams use `StreamRecord`, one JSON object per line, tagged by
//! `type`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{Cursor, DbOp, Delta, ForkStep};

/// An event pushed by the transport, mirroring its three callbacks.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Delta {
        delta: Delta,
        cursor: Cursor,
        fork_step: ForkStep,
    },
    /// The transport hit an error it will handle itself (reconnect, retry).
    Error(String),
    /// The stream ended; carries the last block reference the transport saw.
    Complete { last_block: String },
}

/// Serialized form of a stream event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamRecord {
    Delta {
        cursor: Cursor,
        #[serde(default)]
        fork_step: ForkStep,
        delta: DeltaRecord,
    },
    Error {
        message: String,
    },
    Complete {
        #[serde(default)]
        last_block: String,
    },
}

/// Serialized form of a delta; row images are inline JSON values.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeltaRecord {
    pub table_name: String,
    pub operation: DbOp,
    #[serde(default)]
    pub old_data: Value,
    #[serde(default)]
    pub new_data: Value,
}

impl From<DeltaRecord> for Delta {
    fn from(record: DeltaRecord) -> Self {
        Delta {
            table_name: record.table_name,
            operation: record.operation,
            old_data: image_bytes(record.old_data),
            new_data: image_bytes(record.new_data),
        }
    }
}

impl From<StreamRecord> for StreamEvent {
    fn from(record: StreamRecord) -> Self {
        match record {
            StreamRecord::Delta {
                cursor,
                fork_step,
                delta,
            } => StreamEvent::Delta {
                delta: delta.into(),
                cursor,
                fork_step,
            },
            StreamRecord::Error { message } => StreamEvent::Error(message),
            StreamRecord::Complete { last_block } => StreamEvent::Complete { last_block },
        }
    }
}

fn image_bytes(value: Value) -> Vec<u8> {
    match value {
        Value::Null => Vec::new(),
        other => other.to_string().into_bytes(),
    }
}

use thiserror::Error;

use crate::types::{DbOp, TableKind};

/// Why a row image could not be turned into a typed record.
#[derive(Error, Debug)]
pub enum RowDecodeError {
    #[error("row image is empty")]
    Empty,

    #[error("malformed row image: {0}")]
    Json(#[from] serde_json::Error),

    #[error("row image has an empty `{0}`")]
    MissingIdentity(&'static str),
}

/// Top-level error type for the sync engine.
///
/// Whether an error stops the stream depends on where it happened: the graph
/// must never silently diverge on the document path, while edge rows are
/// relational hints whose failures are logged and skipped.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Graph store unreachable: {0}")]
    Connection(String),

    #[error("Required schema types missing: {}", missing.join(", "))]
    SchemaMismatch { missing: Vec<String> },

    #[error("Schema inspection failed: {0}")]
    Schema(String),

    #[error("Failed to read committed cursor: {0}")]
    Cursor(String),

    #[error("Failed to decode {op} image of {kind} table {table}: {source}")]
    Decode {
        table: String,
        kind: TableKind,
        op: DbOp,
        #[source]
        source: RowDecodeError,
    },

    #[error("Unsupported {op} on {kind} table {table}")]
    UnsupportedOperation {
        table: String,
        kind: TableKind,
        op: DbOp,
    },

    #[error("Mutation failed for {op} on {kind} table {table}: {message}")]
    Mutation {
        table: String,
        kind: TableKind,
        op: DbOp,
        message: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

impl SyncError {
    /// Fatal errors must stop ingestion; the stream resumes from the last
    /// committed cursor after a restart.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Decode { kind, .. } | Self::Mutation { kind, .. } => *kind != TableKind::Edge,
            _ => true,
        }
    }
}

//! deltagraph-core: shared types and error handling for the delta-to-graph sync engine.
//!
//! This crate provides the vocabulary used by every other deltagraph crate:
//! - Deltas, cursors and fork steps as delivered by the chain transport
//! - Decoded row images for the document and edge tables
//! - Stream events and their newline-delimited JSON record format
//! - The sync error taxonomy and its severity policy

pub mod error;
pub mod events;
pub mod types;

pub use error::{RowDecodeError, SyncError};
pub use events::{DeltaRecord, StreamEvent, StreamRecord};
pub use types::{
    ChainContent, ChainDocument, ChainEdge, ContentValue, Cursor, DbOp, Delta, ForkStep, RowImage,
    TableKind, TrackedTables,
};

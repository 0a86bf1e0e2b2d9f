//! deltagraph-sync: delta-to-graph synchronization engine.
//!
//! Routes chain table deltas to the document cache, which turns them into
//! transactional graph mutations, and tracks the resumable stream cursor.

pub mod config;
pub mod doccache;
pub mod graph_cache;
pub mod router;
pub mod source;
pub mod supervisor;

//! Document cache: the collaborator that turns decoded rows into graph state.
//!
//! The router only decides *which* operation a delta maps to; a
//! `DocumentCache` decides how that operation is written. Every call carries
//! the stream cursor so an implementation can persist it atomically with the
//! mutation itself.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use deltagraph_core::{ChainDocument, ChainEdge, Cursor};
use deltagraph_graph::GraphError;

/// Errors reported by a document cache.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Document not found: {hash}")]
    NotFound { hash: String },

    #[error("Rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait DocumentCache: Send + Sync {
    /// Create the document, or replace it in place if it already exists.
    async fn store_document(&self, doc: &ChainDocument, cursor: &Cursor) -> Result<(), CacheError>;

    /// Remove the document together with every statement it owns.
    async fn delete_document(&self, doc: &ChainDocument, cursor: &Cursor)
        -> Result<(), CacheError>;

    /// Add (`delete_op == false`) or remove a single relation between two
    /// existing documents.
    async fn mutate_edge(
        &self,
        edge: &ChainEdge,
        delete_op: bool,
        cursor: &Cursor,
    ) -> Result<(), CacheError>;

    /// Cursor of the last mutation the cache committed, if any.
    async fn last_cursor(&self) -> Result<Option<Cursor>, CacheError>;
}

// ─── In-memory cache (for testing and dry runs) ──────────────────────────────

/// A relation as stored by the memory cache: (from hash, edge name, to hash).
pub type EdgeKey = (String, String, String);

/// The mirrored graph held by `MemoryDocumentCache`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryGraph {
    pub documents: BTreeMap<String, ChainDocument>,
    pub edges: BTreeSet<EdgeKey>,
}

#[derive(Debug, Default)]
struct MemoryState {
    graph: MemoryGraph,
    cursor: Option<Cursor>,
}

/// In-memory document cache with the same relation semantics as the graph
/// store: edges need both endpoints, edge inserts are idempotent, and deleting
/// a document drops every relation touching it.
#[derive(Debug, Default)]
pub struct MemoryDocumentCache {
    state: Mutex<MemoryState>,
}

impl MemoryDocumentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current graph contents.
    pub fn graph(&self) -> MemoryGraph {
        self.state().graph.clone()
    }

    pub fn document(&self, hash: &str) -> Option<ChainDocument> {
        self.state().graph.documents.get(hash).cloned()
    }

    pub fn has_edge(&self, from: &str, edge_name: &str, to: &str) -> bool {
        let key = (from.to_string(), edge_name.to_string(), to.to_string());
        self.state().graph.edges.contains(&key)
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl DocumentCache for MemoryDocumentCache {
    async fn store_document(&self, doc: &ChainDocument, cursor: &Cursor) -> Result<(), CacheError> {
        let mut state = self.state();
        state.graph.documents.insert(doc.hash.clone(), doc.clone());
        state.cursor = Some(cursor.clone());
        Ok(())
    }

    async fn delete_document(
        &self,
        doc: &ChainDocument,
        cursor: &Cursor,
    ) -> Result<(), CacheError> {
        let mut state = self.state();
        state.graph.documents.remove(&doc.hash);
        state
            .graph
            .edges
            .retain(|(from, _, to)| from != &doc.hash && to != &doc.hash);
        state.cursor = Some(cursor.clone());
        Ok(())
    }

    async fn mutate_edge(
        &self,
        edge: &ChainEdge,
        delete_op: bool,
        cursor: &Cursor,
    ) -> Result<(), CacheError> {
        let mut state = self.state();
        for hash in [&edge.from_node, &edge.to_node] {
            if !state.graph.documents.contains_key(hash) {
                return Err(CacheError::NotFound { hash: hash.clone() });
            }
        }

        let key = (
            edge.from_node.clone(),
            edge.edge_name.clone(),
            edge.to_node.clone(),
        );
        if delete_op {
            state.graph.edges.remove(&key);
        } else {
            state.graph.edges.insert(key);
        }
        state.cursor = Some(cursor.clone());
        Ok(())
    }

    async fn last_cursor(&self) -> Result<Option<Cursor>, CacheError> {
        Ok(self.state().cursor.clone())
    }
}

//! The delta router.
//!
//! Each delta goes through `classify → decode → dispatch → record cursor`.
//! The router never terminates the process: fatal failures are returned to the
//! caller untouched (and the cursor stays where it was), non-fatal ones are
//! logged and reported as `DeltaOutcome::Skipped`.

use async_trait::async_trait;

use deltagraph_core::{
    ChainDocument, ChainEdge, Cursor, DbOp, Delta, ForkStep, RowDecodeError, SyncError, TableKind,
    TrackedTables,
};
use deltagraph_graph::GraphError;

use crate::doccache::{CacheError, DocumentCache};

/// Transport callback interface.
///
/// The transport calls these on its own task and must not deliver the next
/// delta before `on_delta` returns.
#[async_trait]
pub trait DeltaHandler: Send {
    async fn on_delta(
        &mut self,
        delta: &Delta,
        cursor: &Cursor,
        fork_step: ForkStep,
    ) -> Result<DeltaOutcome, SyncError>;

    fn on_error(&mut self, message: &str);

    fn on_complete(&mut self, last_block: &str);
}

/// What happened to a delta that did not stop the stream.
#[derive(Debug)]
pub enum DeltaOutcome {
    /// The cache applied the mutation.
    Applied,
    /// A non-fatal failure on the edge path; the delta was dropped.
    Skipped(SyncError),
    /// The table is not tracked.
    Ignored,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    pub applied: u64,
    pub skipped: u64,
    pub ignored: u64,
}

impl RouterStats {
    fn record(&mut self, outcome: &DeltaOutcome) {
        match outcome {
            DeltaOutcome::Applied => self.applied += 1,
            DeltaOutcome::Skipped(_) => self.skipped += 1,
            DeltaOutcome::Ignored => self.ignored += 1,
        }
    }
}

/// Routes deltas of the tracked tables to a `DocumentCache`.
pub struct DeltaRouter<C> {
    cache: C,
    tables: TrackedTables,
    cursor: Option<Cursor>,
    stats: RouterStats,
}

impl<C: DocumentCache> DeltaRouter<C> {
    pub fn new(cache: C, tables: TrackedTables) -> Self {
        Self {
            cache,
            tables,
            cursor: None,
            stats: RouterStats::default(),
        }
    }

    /// Start from a previously committed position.
    pub fn with_cursor(mut self, cursor: Option<Cursor>) -> Self {
        self.cursor = cursor;
        self
    }

    /// Resume position: the cursor of the last delta fully handled.
    pub fn cursor(&self) -> Option<&Cursor> {
        self.cursor.as_ref()
    }

    pub fn stats(&self) -> RouterStats {
        self.stats
    }

    pub fn cache(&self) -> &C {
        &self.cache
    }

    pub fn tables(&self) -> &TrackedTables {
        &self.tables
    }

    /// Handle one delta.
    ///
    /// Undo steps arrive with the inverse operation already applied by the
    /// transport, so `fork_step` only shows up in logs.
    pub async fn route(
        &mut self,
        delta: &Delta,
        cursor: &Cursor,
        fork_step: ForkStep,
    ) -> Result<DeltaOutcome, SyncError> {
        tracing::debug!(
            table = %delta.table_name,
            op = %delta.operation,
            cursor = %cursor,
            fork_step = %fork_step,
            "Delta received"
        );

        let applied = match self.tables.classify(&delta.table_name) {
            TableKind::Document => Some(self.apply_document(delta, cursor).await),
            TableKind::Edge => Some(self.apply_edge(delta, cursor).await),
            TableKind::Ignored => None,
        };

        let outcome = match applied {
            None => DeltaOutcome::Ignored,
            Some(Ok(())) => DeltaOutcome::Applied,
            Some(Err(e)) if !e.is_fatal() => {
                tracing::error!(
                    table = %delta.table_name,
                    op = %delta.operation,
                    cursor = %cursor,
                    fork_step = %fork_step,
                    row = %String::from_utf8_lossy(delta.relevant_image()),
                    error = %e,
                    "Skipping delta"
                );
                DeltaOutcome::Skipped(e)
            }
            Some(Err(e)) => {
                tracing::error!(
                    table = %delta.table_name,
                    op = %delta.operation,
                    cursor = %cursor,
                    fork_step = %fork_step,
                    old_row = %String::from_utf8_lossy(&delta.old_data),
                    new_row = %String::from_utf8_lossy(&delta.new_data),
                    error = %e,
                    "Delta failed"
                );
                return Err(e);
            }
        };

        self.stats.record(&outcome);
        self.cursor = Some(cursor.clone());
        Ok(outcome)
    }

    async fn apply_document(&self, delta: &Delta, cursor: &Cursor) -> Result<(), SyncError> {
        let kind = TableKind::Document;
        let doc = ChainDocument::decode(delta.relevant_image())
            .map_err(|source| decode_error(delta, kind, source))?;

        let result = match delta.operation {
            DbOp::Insert | DbOp::Update => {
                tracing::trace!(hash = %doc.hash, doc_type = %doc.doc_type(), "Storing document");
                self.cache.store_document(&doc, cursor).await
            }
            DbOp::Remove => {
                tracing::trace!(hash = %doc.hash, "Deleting document");
                self.cache.delete_document(&doc, cursor).await
            }
        };
        result.map_err(|e| cache_error(delta, kind, e))
    }

    async fn apply_edge(&self, delta: &Delta, cursor: &Cursor) -> Result<(), SyncError> {
        let kind = TableKind::Edge;
        let op = delta.operation;

        // Relation identity (from, to, name) is immutable.
        if op == DbOp::Update {
            return Err(SyncError::UnsupportedOperation {
                table: delta.table_name.clone(),
                kind,
                op,
            });
        }

        let edge = ChainEdge::decode(delta.relevant_image())
            .map_err(|source| decode_error(delta, kind, source))?;
        let delete_op = op == DbOp::Remove;
        tracing::trace!(
            from = %edge.from_node,
            to = %edge.to_node,
            edge = %edge.edge_name,
            delete_op,
            "Mutating edge"
        );
        self.cache
            .mutate_edge(&edge, delete_op, cursor)
            .await
            .map_err(|e| cache_error(delta, kind, e))
    }
}

fn decode_error(delta: &Delta, kind: TableKind, source: RowDecodeError) -> SyncError {
    SyncError::Decode {
        table: delta.table_name.clone(),
        kind,
        op: delta.operation,
        source,
    }
}

fn cache_error(delta: &Delta, kind: TableKind, error: CacheError) -> SyncError {
    match error {
        // Losing the store is never a per-row problem.
        CacheError::Graph(GraphError::Connection(msg)) => SyncError::Connection(msg),
        other => SyncError::Mutation {
            table: delta.table_name.clone(),
            kind,
            op: delta.operation,
            message: other.to_string(),
        },
    }
}

#[async_trait]
impl<C: DocumentCache> DeltaHandler for DeltaRouter<C> {
    async fn on_delta(
        &mut self,
        delta: &Delta,
        cursor: &Cursor,
        fork_step: ForkStep,
    ) -> Result<DeltaOutcome, SyncError> {
        self.route(delta, cursor, fork_step).await
    }

    fn on_error(&mut self, message: &str) {
        tracing::error!(error = %message, cursor = ?self.cursor, "Transport reported an error");
    }

    fn on_complete(&mut self, last_block: &str) {
        tracing::info!(
            last_block = %last_block,
            cursor = ?self.cursor,
            applied = self.stats.applied,
            skipped = self.stats.skipped,
            ignored = self.stats.ignored,
            "Stream complete"
        );
    }
}

//! Startup checks and the ingestion loop.
//!
//! `start` verifies the graph schema before a single event is pulled from the
//! source, then drives the handler until the stream completes or a fatal
//! error comes back. `prepare` runs the same check ahead of reading the
//! resume cursor, so a fresh store reports its missing types rather than a
//! failed cursor query.

use async_trait::async_trait;

use deltagraph_core::{Cursor, StreamEvent, SyncError};
use deltagraph_graph::{GraphClient, GraphError};

use crate::doccache::{CacheError, DocumentCache};
use crate::router::{DeltaHandler, DeltaOutcome};
use crate::source::DeltaSource;

/// Read-only schema inspection used before ingestion starts.
#[async_trait]
pub trait SchemaCheck: Send + Sync {
    /// The subset of `required` that the store does not declare.
    async fn missing_types(&self, required: &[String]) -> Result<Vec<String>, SyncError>;
}

#[async_trait]
impl SchemaCheck for GraphClient {
    async fn missing_types(&self, required: &[String]) -> Result<Vec<String>, SyncError> {
        GraphClient::missing_types(self, required)
            .await
            .map_err(|e| match e {
                GraphError::Connection(msg) => SyncError::Connection(msg),
                other => SyncError::Schema(other.to_string()),
            })
    }
}

/// Fail with `SchemaMismatch` unless every required type is declared.
pub async fn ensure_schema<S>(inspector: &S, required: &[String]) -> Result<(), SyncError>
where
    S: SchemaCheck + ?Sized,
{
    let missing = inspector.missing_types(required).await?;
    if !missing.is_empty() {
        tracing::error!(missing = ?missing, "Graph schema is missing required types");
        return Err(SyncError::SchemaMismatch { missing });
    }
    tracing::info!(types = ?required, "Graph schema verified");
    Ok(())
}

/// Verify the schema (when an inspector is given), then read the cursor the
/// cache last committed.
pub async fn prepare<I, C>(
    inspector: Option<&I>,
    required: &[String],
    cache: &C,
) -> Result<Option<Cursor>, SyncError>
where
    I: SchemaCheck + ?Sized,
    C: DocumentCache + ?Sized,
{
    if let Some(inspector) = inspector {
        ensure_schema(inspector, required).await?;
    }
    cache.last_cursor().await.map_err(|e| match e {
        CacheError::Graph(GraphError::Connection(msg)) => SyncError::Connection(msg),
        other => SyncError::Cursor(other.to_string()),
    })
}

/// How a run ended without a fatal error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEnd {
    /// The transport signalled completion.
    Completed { last_block: String },
    /// The source ran dry without a completion event.
    Exhausted,
}

/// Pump events from `source` into `handler`.
///
/// Handler errors are fatal by construction (non-fatal ones come back as
/// `DeltaOutcome::Skipped`), so the first one ends the run.
pub async fn run<S, H>(source: &mut S, handler: &mut H) -> Result<StreamEnd, SyncError>
where
    S: DeltaSource + ?Sized,
    H: DeltaHandler + ?Sized,
{
    while let Some(event) = source.next_event().await? {
        match event {
            StreamEvent::Delta {
                delta,
                cursor,
                fork_step,
            } => match handler.on_delta(&delta, &cursor, fork_step).await {
                Ok(DeltaOutcome::Applied | DeltaOutcome::Ignored) => {}
                Ok(DeltaOutcome::Skipped(_)) => {
                    tracing::warn!(cursor = %cursor, table = %delta.table_name, "Delta skipped");
                }
                Err(e) => {
                    tracing::error!(error = %e, cursor = %cursor, "Fatal error, stopping ingestion");
                    return Err(e);
                }
            },
            StreamEvent::Error(message) => handler.on_error(&message),
            StreamEvent::Complete { last_block } => {
                handler.on_complete(&last_block);
                return Ok(StreamEnd::Completed { last_block });
            }
        }
    }

    tracing::info!("Event source exhausted");
    Ok(StreamEnd::Exhausted)
}

/// Verify the schema, then run the stream.
pub async fn start<I, S, H>(
    inspector: &I,
    required: &[String],
    source: &mut S,
    handler: &mut H,
) -> Result<StreamEnd, SyncError>
where
    I: SchemaCheck + ?Sized,
    S: DeltaSource + ?Sized,
    H: DeltaHandler + ?Sized,
{
    ensure_schema(inspector, required).await?;
    run(source, handler).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doccache::MemoryDocumentCache;
    use crate::router::DeltaRouter;
    use deltagraph_core::{ChainDocument, ChainEdge, Delta, ForkStep, TrackedTables};
    use serde_json::json;
    use tokio::sync::mpsc;

    struct FixedSchema {
        declared: Vec<&'static str>,
    }

    #[async_trait]
    impl SchemaCheck for FixedSchema {
        async fn missing_types(&self, required: &[String]) -> Result<Vec<String>, SyncError> {
            Ok(required
                .iter()
                .filter(|t| !self.declared.contains(&t.as_str()))
                .cloned()
                .collect())
        }
    }

    struct Unreachable;

    #[async_trait]
    impl SchemaCheck for Unreachable {
        async fn missing_types(&self, _: &[String]) -> Result<Vec<String>, SyncError> {
            Err(SyncError::Connection("connection refused".to_string()))
        }
    }

    fn required() -> Vec<String> {
        ["Document", "ContentGroup", "Content", "Cursor"]
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    fn router() -> DeltaRouter<MemoryDocumentCache> {
        DeltaRouter::new(
            MemoryDocumentCache::new(),
            TrackedTables::new("documents", "edges"),
        )
    }

    fn doc_event(hash: &str, cursor: &str) -> StreamEvent {
        StreamEvent::Delta {
            delta: Delta::insert("documents", json!({"hash": hash}).to_string().into_bytes()),
            cursor: Cursor::new(cursor),
            fork_step: ForkStep::New,
        }
    }

    fn edge_event(from: &str, to: &str, cursor: &str) -> StreamEvent {
        StreamEvent::Delta {
            delta: Delta::insert(
                "edges",
                json!({"from_node": from, "to_node": to, "edge_name": "owns"})
                    .to_string()
                    .into_bytes(),
            ),
            cursor: Cursor::new(cursor),
            fork_step: ForkStep::New,
        }
    }

    #[tokio::test]
    async fn test_schema_mismatch_consumes_nothing() {
        let inspector = FixedSchema {
            declared: vec!["Document", "Content"],
        };
        let (tx, mut rx) = mpsc::channel(4);
        tx.send(doc_event("a", "c1")).await.unwrap();
        let mut router = router();

        let err = start(&inspector, &required(), &mut rx, &mut router)
            .await
            .unwrap_err();
        match err {
            SyncError::SchemaMismatch { missing } => {
                assert_eq!(missing, vec!["ContentGroup".to_string(), "Cursor".to_string()]);
            }
            other => panic!("expected schema mismatch, got {other:?}"),
        }

        // The queued event is still in the channel.
        assert!(rx.try_recv().is_ok());
        assert!(router.cursor().is_none());
    }

    #[tokio::test]
    async fn test_unreachable_store_is_a_connection_error() {
        let (_tx, mut rx) = mpsc::channel::<StreamEvent>(1);
        let mut router = router();
        let err = start(&Unreachable, &required(), &mut rx, &mut router)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Connection(_)));
    }

    /// A store whose cursor query fails the way an unindexed Dgraph does.
    struct UnindexedCache;

    #[async_trait]
    impl DocumentCache for UnindexedCache {
        async fn store_document(&self, _: &ChainDocument, _: &Cursor) -> Result<(), CacheError> {
            Ok(())
        }

        async fn delete_document(&self, _: &ChainDocument, _: &Cursor) -> Result<(), CacheError> {
            Ok(())
        }

        async fn mutate_edge(&self, _: &ChainEdge, _: bool, _: &Cursor) -> Result<(), CacheError> {
            Ok(())
        }

        async fn last_cursor(&self) -> Result<Option<Cursor>, CacheError> {
            Err(CacheError::Graph(GraphError::Query(
                "predicate cursor_id is not indexed".to_string(),
            )))
        }
    }

    #[tokio::test]
    async fn test_prepare_reports_schema_before_cursor() {
        let inspector = FixedSchema { declared: vec![] };
        let err = prepare(Some(&inspector), &required(), &UnindexedCache)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::SchemaMismatch { .. }));
    }

    #[tokio::test]
    async fn test_prepare_cursor_failure_is_fatal() {
        let inspector = FixedSchema {
            declared: vec!["Document", "ContentGroup", "Content", "Cursor"],
        };
        let err = prepare(Some(&inspector), &required(), &UnindexedCache)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Cursor(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_prepare_returns_committed_cursor() {
        let mut router = router();
        router
            .on_delta(
                &Delta::insert("documents", json!({"hash": "a"}).to_string().into_bytes()),
                &Cursor::new("c7"),
                ForkStep::New,
            )
            .await
            .unwrap();

        let resume = prepare(None::<&FixedSchema>, &required(), router.cache())
            .await
            .unwrap();
        assert_eq!(resume, Some(Cursor::new("c7")));
    }

    #[tokio::test]
    async fn test_run_to_completion() {
        let inspector = FixedSchema {
            declared: vec!["Document", "ContentGroup", "Content", "Cursor"],
        };
        let (tx, mut rx) = mpsc::channel(16);
        for event in [
            doc_event("a", "c1"),
            doc_event("b", "c2"),
            StreamEvent::Error("transient".to_string()),
            edge_event("a", "b", "c3"),
            // Dangling edge: skipped, stream continues.
            edge_event("a", "zz", "c4"),
            StreamEvent::Complete {
                last_block: "77".to_string(),
            },
            doc_event("never", "c5"),
        ] {
            tx.send(event).await.unwrap();
        }
        let mut router = router();

        let end = start(&inspector, &required(), &mut rx, &mut router)
            .await
            .unwrap();
        assert_eq!(
            end,
            StreamEnd::Completed {
                last_block: "77".to_string()
            }
        );
        assert_eq!(router.cursor(), Some(&Cursor::new("c4")));
        assert!(router.cache().has_edge("a", "owns", "b"));
        assert!(router.cache().document("never").is_none());
        assert_eq!(router.stats().applied, 3);
        assert_eq!(router.stats().skipped, 1);
    }

    #[tokio::test]
    async fn test_fatal_error_stops_the_run() {
        let (tx, mut rx) = mpsc::channel(8);
        tx.send(doc_event("a", "c1")).await.unwrap();
        tx.send(StreamEvent::Delta {
            delta: Delta::insert("documents", b"{broken".to_vec()),
            cursor: Cursor::new("c2"),
            fork_step: ForkStep::New,
        })
        .await
        .unwrap();
        tx.send(doc_event("b", "c3")).await.unwrap();
        drop(tx);
        let mut router = router();

        let err = run(&mut rx, &mut router).await.unwrap_err();
        assert!(matches!(err, SyncError::Decode { .. }));
        assert_eq!(router.cursor(), Some(&Cursor::new("c1")));
        assert!(router.cache().document("b").is_none());
    }

    #[tokio::test]
    async fn test_closed_channel_exhausts() {
        let (tx, mut rx) = mpsc::channel(2);
        tx.send(doc_event("a", "c1")).await.unwrap();
        drop(tx);
        let mut router = router();

        assert_eq!(run(&mut rx, &mut router).await.unwrap(), StreamEnd::Exhausted);
        assert_eq!(router.cursor(), Some(&Cursor::new("c1")));
    }
}

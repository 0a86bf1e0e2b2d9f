//! Dgraph connection management and the transactional graph client.
//!
//! Talks to a Dgraph alpha over its HTTP API. Reads run as read-only queries;
//! writes are grouped into one server-side transaction that is committed only
//! when every mutation in the group succeeded, and aborted otherwise.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::mutations::{Mutation, MutationResponse};

/// Errors from graph operations.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Dgraph connection error: {0}")]
    Connection(String),

    #[error("Dgraph schema error: {0}")]
    Schema(String),

    #[error("Dgraph query error: {0}")]
    Query(String),

    #[error("Dgraph mutation error: {0}")]
    Mutation(String),

    #[error("Failed to decode Dgraph response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Type not found: {0}")]
    NotFound(String),

    #[error("Invalid uid: {0}")]
    InvalidUid(String),

    #[error("Invalid predicate name: {0}")]
    InvalidPredicate(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Configuration for connecting to Dgraph.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    /// Alpha HTTP endpoint, either `host:port` or a full URL.
    pub endpoint: String,
    pub timeout_secs: u64,
}

impl GraphConfig {
    pub const DEFAULT_ENDPOINT: &'static str = "localhost:8080";
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            endpoint: Self::DEFAULT_ENDPOINT.to_string(),
            timeout_secs: 30,
        }
    }
}

/// What to remove with a drop operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropScope {
    /// All data, keeping the schema.
    Data,
    /// Data and schema.
    All,
}

/// A schema-level operation applied through `/alter`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlterOp {
    Schema(String),
    Drop(DropScope),
}

/// Thread-safe Dgraph client.
///
/// Clone is cheap (the HTTP connection pool is shared).
#[derive(Clone)]
pub struct GraphClient {
    http: reqwest::Client,
    base_url: String,
}

impl GraphClient {
    /// Connect to Dgraph and verify the alpha answers its health check.
    pub async fn connect(config: &GraphConfig) -> Result<Self, GraphError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GraphError::Connection(e.to_string()))?;
        let base_url = normalize_endpoint(&config.endpoint);

        let resp = http
            .get(format!("{base_url}/health"))
            .send()
            .await
            .map_err(|e| GraphError::Connection(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(GraphError::Connection(format!(
                "health check returned HTTP {}",
                resp.status()
            )));
        }

        tracing::info!(endpoint = %base_url, "Connected to Dgraph");
        Ok(Self { http, base_url })
    }

    pub fn endpoint(&self) -> &str {
        &self.base_url
    }

    // ── Schema ───────────────────────────────────────────────────

    /// Apply a schema change or drop. Not transactional with data mutations.
    pub async fn alter(&self, op: AlterOp) -> Result<(), GraphError> {
        let request = self.http.post(format!("{}/alter", self.base_url));
        let request = match &op {
            AlterOp::Schema(schema) => request.body(schema.clone()),
            AlterOp::Drop(DropScope::Data) => request.json(&json!({ "drop_op": "DATA" })),
            AlterOp::Drop(DropScope::All) => request.json(&json!({ "drop_all": true })),
        };
        self.send(request).await?.into_data(GraphError::Schema)?;
        tracing::debug!(op = op_name(&op), "Alter applied");
        Ok(())
    }

    pub async fn update_schema(&self, schema: &str) -> Result<(), GraphError> {
        self.alter(AlterOp::Schema(schema.to_string())).await
    }

    pub async fn drop(&self, scope: DropScope) -> Result<(), GraphError> {
        self.alter(AlterOp::Drop(scope)).await
    }

    pub async fn drop_data(&self) -> Result<(), GraphError> {
        self.drop(DropScope::Data).await
    }

    pub async fn drop_all(&self) -> Result<(), GraphError> {
        self.drop(DropScope::All).await
    }

    // ── Reads ────────────────────────────────────────────────────

    /// Execute a read-only query and decode its `data` block into `T`.
    ///
    /// Variable names carry their `$` prefix, e.g. `{"$hash": "..."}`.
    pub async fn query<T: DeserializeOwned>(
        &self,
        query: &str,
        vars: Option<&HashMap<String, String>>,
    ) -> Result<T, GraphError> {
        let body = match vars {
            Some(vars) => json!({ "query": query, "variables": vars }),
            None => json!({ "query": query }),
        };
        let request = self
            .http
            .post(format!("{}/query", self.base_url))
            .query(&[("ro", "true")])
            .json(&body);

        let (data, _) = self.send(request).await?.into_data(GraphError::Query)?;
        Ok(serde_json::from_value(data)?)
    }

    // ── Writes ───────────────────────────────────────────────────

    /// Apply all mutations in one transaction, in order.
    ///
    /// Commits only if every mutation succeeds; otherwise the transaction is
    /// aborted and the first error is returned. The response for each
    /// mutation carries the uids assigned to its blank nodes.
    pub async fn mutate(&self, mutations: &[Mutation]) -> Result<Vec<MutationResponse>, GraphError> {
        let mut txn = Txn::default();
        let mut responses = Vec::with_capacity(mutations.len());

        for mutation in mutations {
            match self.mutate_in_txn(&mut txn, mutation).await {
                Ok(response) => responses.push(response),
                Err(e) => {
                    self.discard(&txn).await;
                    return Err(e);
                }
            }
        }

        if let Err(e) = self.commit(&txn).await {
            self.discard(&txn).await;
            return Err(e);
        }

        tracing::debug!(
            start_ts = txn.start_ts,
            mutations = mutations.len(),
            "Transaction committed"
        );
        Ok(responses)
    }

    /// Release the client. Pooled connections close when the last clone drops.
    pub fn close(self) {
        tracing::debug!(endpoint = %self.base_url, "Dgraph client closed");
    }

    async fn mutate_in_txn(
        &self,
        txn: &mut Txn,
        mutation: &Mutation,
    ) -> Result<MutationResponse, GraphError> {
        let mut request = self.http.post(format!("{}/mutate", self.base_url));
        if txn.start_ts != 0 {
            request = request.query(&[("startTs", txn.start_ts)]);
        }
        let (data, txn_ctx) = self
            .send(request.json(mutation))
            .await?
            .into_data(GraphError::Mutation)?;

        if let Some(ctx) = txn_ctx {
            txn.absorb(ctx);
        }
        Ok(serde_json::from_value(data)?)
    }

    async fn commit(&self, txn: &Txn) -> Result<(), GraphError> {
        if txn.start_ts == 0 {
            return Ok(());
        }
        let request = self
            .http
            .post(format!("{}/commit", self.base_url))
            .query(&[("startTs", txn.start_ts)])
            .json(&json!({ "keys": txn.keys, "preds": txn.preds }));
        self.send(request).await?.into_data(GraphError::Mutation)?;
        Ok(())
    }

    async fn discard(&self, txn: &Txn) {
        if txn.start_ts == 0 {
            return;
        }
        let request = self
            .http
            .post(format!("{}/commit", self.base_url))
            .query(&[("startTs", txn.start_ts.to_string().as_str()), ("abort", "true")]);
        match self.send(request).await {
            Ok(_) => tracing::debug!(start_ts = txn.start_ts, "Transaction aborted"),
            Err(e) => {
                tracing::warn!(start_ts = txn.start_ts, error = %e, "Failed to abort transaction")
            }
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Envelope, GraphError> {
        let resp = request.send().await.map_err(transport_error)?;
        let status = resp.status();
        let body = resp.text().await.map_err(transport_error)?;

        match serde_json::from_str::<Envelope>(&body) {
            Ok(envelope) if status.is_success() || !envelope.errors.is_empty() => Ok(envelope),
            Ok(_) => Ok(Envelope::failed(format!("HTTP {status}: {body}"))),
            Err(_) if !status.is_success() => Ok(Envelope::failed(format!("HTTP {status}: {body}"))),
            Err(e) => Err(GraphError::Decode(e)),
        }
    }
}

// ── Wire types ───────────────────────────────────────────────────

/// Every Dgraph HTTP response: `data`, or `errors`, plus transaction info.
#[derive(Debug, Default, Deserialize)]
struct Envelope {
    #[serde(default)]
    data: Value,
    #[serde(default)]
    errors: Vec<ErrorMessage>,
    #[serde(default)]
    extensions: Option<Extensions>,
}

#[derive(Debug, Deserialize)]
struct ErrorMessage {
    message: String,
}

#[derive(Debug, Default, Deserialize)]
struct Extensions {
    txn: Option<TxnContext>,
}

#[derive(Debug, Default, Deserialize)]
struct TxnContext {
    #[serde(default)]
    start_ts: u64,
    #[serde(default)]
    keys: Vec<String>,
    #[serde(default)]
    preds: Vec<String>,
}

impl Envelope {
    fn failed(message: String) -> Self {
        Self {
            errors: vec![ErrorMessage { message }],
            ..Default::default()
        }
    }

    /// Split into data and transaction context, or fail with the reported errors.
    fn into_data(
        self,
        kind: fn(String) -> GraphError,
    ) -> Result<(Value, Option<TxnContext>), GraphError> {
        if !self.errors.is_empty() {
            let message = self
                .errors
                .into_iter()
                .map(|e| e.message)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(kind(message));
        }
        Ok((self.data, self.extensions.and_then(|e| e.txn)))
    }
}

/// Client-side state of an open read-write transaction.
#[derive(Debug, Default)]
struct Txn {
    start_ts: u64,
    keys: BTreeSet<String>,
    preds: BTreeSet<String>,
}

impl Txn {
    fn absorb(&mut self, ctx: TxnContext) {
        if self.start_ts == 0 {
            self.start_ts = ctx.start_ts;
        }
        self.keys.extend(ctx.keys);
        self.preds.extend(ctx.preds);
    }
}

// ── Helpers ──────────────────────────────────────────────────────

/// Accept `host:port` or a full URL; empty means the default alpha.
fn normalize_endpoint(endpoint: &str) -> String {
    let endpoint = endpoint.trim().trim_end_matches('/');
    let endpoint = if endpoint.is_empty() {
        GraphConfig::DEFAULT_ENDPOINT
    } else {
        endpoint
    };
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_string()
    } else {
        format!("http://{endpoint}")
    }
}

fn transport_error(e: reqwest::Error) -> GraphError {
    if e.is_connect() || e.is_timeout() {
        GraphError::Connection(e.to_string())
    } else {
        GraphError::Http(e)
    }
}

fn op_name(op: &AlterOp) -> &'static str {
    match op {
        AlterOp::Schema(_) => "schema",
        AlterOp::Drop(DropScope::Data) => "drop_data",
        AlterOp::Drop(DropScope::All) => "drop_all",
    }
}

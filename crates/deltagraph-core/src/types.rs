//! Core domain types for the delta-to-graph sync engine.
//!
//! A `Delta` is one row change on a tracked chain table. The router classifies
//! it with `TrackedTables`, decodes the relevant image into a `RowImage` and
//! hands the decoded document or edge to the document cache together with the
//! stream `Cursor`.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::RowDecodeError;

// ── Cursor ────────────────────────────────────────────────────────

/// Opaque, resumable stream position issued by the transport.
///
/// Only the transport interprets the contents. The engine stores it after a
/// delta has been fully applied and hands it back on restart.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(transparent)]
pub struct Cursor(pub String);

impl Cursor {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Cursor {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl From<String> for Cursor {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

// ── Delta ─────────────────────────────────────────────────────────

/// Database operation carried by a delta.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DbOp {
    Insert,
    Update,
    Remove,
}

impl DbOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Remove => "remove",
        }
    }
}

impl fmt::Display for DbOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a delta moves the chain forward or rolls back a fork.
///
/// Undo deltas arrive with the inverse operation already resolved by the
/// transport, so the router applies every step the same way.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ForkStep {
    #[default]
    New,
    Undo,
    Irreversible,
}

impl fmt::Display for ForkStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::Undo => "undo",
            Self::Irreversible => "irreversible",
        };
        f.write_str(s)
    }
}

/// A change event for one row of a tracked table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delta {
    pub table_name: String,
    pub operation: DbOp,
    pub old_data: Vec<u8>,
    pub new_data: Vec<u8>,
}

impl Delta {
    pub fn insert(table_name: impl Into<String>, new_data: impl Into<Vec<u8>>) -> Self {
        Self {
            table_name: table_name.into(),
            operation: DbOp::Insert,
            old_data: Vec::new(),
            new_data: new_data.into(),
        }
    }

    pub fn update(
        table_name: impl Into<String>,
        old_data: impl Into<Vec<u8>>,
        new_data: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            table_name: table_name.into(),
            operation: DbOp::Update,
            old_data: old_data.into(),
            new_data: new_data.into(),
        }
    }

    pub fn remove(table_name: impl Into<String>, old_data: impl Into<Vec<u8>>) -> Self {
        Self {
            table_name: table_name.into(),
            operation: DbOp::Remove,
            old_data: old_data.into(),
            new_data: Vec::new(),
        }
    }

    /// The row image that matters for this operation: the old image for
    /// removes, the new image for inserts and updates.
    pub fn relevant_image(&self) -> &[u8] {
        match self.operation {
            DbOp::Remove => &self.old_data,
            DbOp::Insert | DbOp::Update => &self.new_data,
        }
    }
}

// ── Table classification ──────────────────────────────────────────

/// How the router treats rows of a given table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableKind {
    Document,
    Edge,
    Ignored,
}

impl fmt::Display for TableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Document => "document",
            Self::Edge => "edge",
            Self::Ignored => "ignored",
        };
        f.write_str(s)
    }
}

/// The document table and the edge table mirrored into the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedTables {
    pub doc_table: String,
    pub edge_table: String,
}

impl TrackedTables {
    pub fn new(doc_table: impl Into<String>, edge_table: impl Into<String>) -> Self {
        Self {
            doc_table: doc_table.into(),
            edge_table: edge_table.into(),
        }
    }

    pub fn classify(&self, table_name: &str) -> TableKind {
        if table_name == self.doc_table {
            TableKind::Document
        } else if table_name == self.edge_table {
            TableKind::Edge
        } else {
            TableKind::Ignored
        }
    }
}

// ── Row images ────────────────────────────────────────────────────

/// Chain ABI variant encoding of a content value: `["type_tag", value]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentValue(pub String, pub Value);

impl ContentValue {
    pub fn type_tag(&self) -> &str {
        &self.0
    }

    pub fn value(&self) -> &Value {
        &self.1
    }

    /// Render the value as plain text; strings lose their JSON quotes.
    pub fn render(&self) -> String {
        match &self.1 {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// One labelled value inside a document content group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChainContent {
    pub label: String,
    pub value: ContentValue,
}

/// Decoded row of the document table.
///
/// `hash` is the stable identity key. Fields this engine does not know about
/// are kept in `extra` so newer contract versions still decode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChainDocument {
    #[serde(default)]
    pub id: u64,
    pub hash: String,
    #[serde(default)]
    pub creator: String,
    #[serde(default)]
    pub created_date: String,
    #[serde(default)]
    pub content_groups: Vec<Vec<ChainContent>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChainDocument {
    pub const DEFAULT_TYPE: &'static str = "Document";

    pub fn decode(bytes: &[u8]) -> Result<Self, RowDecodeError> {
        let doc: Self = decode_json(bytes)?;
        if doc.hash.is_empty() {
            return Err(RowDecodeError::MissingIdentity("hash"));
        }
        Ok(doc)
    }

    /// Type discriminator: the value of the first content labelled `type`.
    pub fn doc_type(&self) -> String {
        self.content_groups
            .iter()
            .flatten()
            .find(|c| c.label == "type")
            .map(|c| c.value.render())
            .unwrap_or_else(|| Self::DEFAULT_TYPE.to_string())
    }
}

/// Decoded row of the edge table: a named relation between two documents,
/// both identified by hash.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainEdge {
    #[serde(default)]
    pub id: u64,
    pub from_node: String,
    pub to_node: String,
    pub edge_name: String,
    #[serde(default)]
    pub creator: String,
    #[serde(default)]
    pub created_date: String,
}

impl ChainEdge {
    pub fn decode(bytes: &[u8]) -> Result<Self, RowDecodeError> {
        let edge: Self = decode_json(bytes)?;
        if edge.from_node.is_empty() {
            return Err(RowDecodeError::MissingIdentity("from_node"));
        }
        if edge.to_node.is_empty() {
            return Err(RowDecodeError::MissingIdentity("to_node"));
        }
        if edge.edge_name.is_empty() {
            return Err(RowDecodeError::MissingIdentity("edge_name"));
        }
        Ok(edge)
    }
}

/// A decoded row image, tagged by the shape of the table it came from.
#[derive(Debug, Clone, PartialEq)]
pub enum RowImage {
    Document(ChainDocument),
    Edge(ChainEdge),
    /// Rows of tables without a known shape.
    Generic(Map<String, Value>),
}

impl RowImage {
    pub fn decode(kind: TableKind, bytes: &[u8]) -> Result<Self, RowDecodeError> {
        match kind {
            TableKind::Document => ChainDocument::decode(bytes).map(Self::Document),
            TableKind::Edge => ChainEdge::decode(bytes).map(Self::Edge),
            TableKind::Ignored => decode_json(bytes).map(Self::Generic),
        }
    }
}

fn decode_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, RowDecodeError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(RowDecodeError::Empty);
    }
    Ok(serde_json::from_slice(bytes)?)
}

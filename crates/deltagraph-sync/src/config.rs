//! Configuration for the sync daemon.
//!
//! Loaded from an optional `deltagraph.toml` and `DELTAGRAPH__` environment
//! variables, e.g. `DELTAGRAPH__SYNC__DOC_TABLE=documents`.

use serde::Deserialize;

use deltagraph_core::{Cursor, SyncError, TrackedTables};
use deltagraph_graph::GraphConfig;

use crate::graph_cache::REQUIRED_TYPES;

pub const ENV_PREFIX: &str = "DELTAGRAPH";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub sync: SyncConfig,

    #[serde(default)]
    pub dgraph: DgraphSettings,
}

/// The `[sync]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Contract account whose tables are mirrored.
    #[serde(default)]
    pub contract: String,

    #[serde(default = "default_doc_table")]
    pub doc_table: String,

    #[serde(default = "default_edge_table")]
    pub edge_table: String,

    /// First block to stream from when no cursor is known.
    #[serde(default)]
    pub start_block: u64,

    /// Cursor to resume from when the cache has none stored.
    #[serde(default)]
    pub start_cursor: Option<String>,

    #[serde(default = "default_required_types")]
    pub required_types: Vec<String>,

    /// Apply the bundled schema before the schema check.
    #[serde(default)]
    pub init_schema: bool,

    /// Key of the cursor node in the graph.
    #[serde(default = "default_cursor_id")]
    pub cursor_id: String,

    #[serde(default)]
    pub transport_endpoint: Option<String>,

    #[serde(default)]
    pub transport_api_key: Option<String>,
}

/// The `[dgraph]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct DgraphSettings {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_doc_table() -> String {
    "documents".to_string()
}

fn default_edge_table() -> String {
    "edges".to_string()
}

fn default_required_types() -> Vec<String> {
    REQUIRED_TYPES.iter().map(|t| t.to_string()).collect()
}

fn default_cursor_id() -> String {
    "deltagraph".to_string()
}

fn default_endpoint() -> String {
    GraphConfig::DEFAULT_ENDPOINT.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            contract: String::new(),
            doc_table: default_doc_table(),
            edge_table: default_edge_table(),
            start_block: 0,
            start_cursor: None,
            required_types: default_required_types(),
            init_schema: false,
            cursor_id: default_cursor_id(),
            transport_endpoint: None,
            transport_api_key: None,
        }
    }
}

impl Default for DgraphSettings {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl AppConfig {
    /// Load `<file_prefix>.{toml,json,...}` (optional) overlaid with the
    /// process environment.
    pub fn load(file_prefix: &str) -> Result<Self, SyncError> {
        Self::build(config::File::with_name(file_prefix).required(false), None)
    }

    /// Load from TOML text, overlaid with an explicit environment map.
    pub fn load_from_str(
        toml: &str,
        env: Option<config::Map<String, String>>,
    ) -> Result<Self, SyncError> {
        Self::build(config::File::from_str(toml, config::FileFormat::Toml), env)
    }

    fn build<S>(file: S, env: Option<config::Map<String, String>>) -> Result<Self, SyncError>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let cfg = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("sync.required_types")
                    .source(env),
            )
            .build()
            .map_err(|e| SyncError::Config(e.to_string()))?;

        let app: Self = cfg
            .try_deserialize()
            .map_err(|e| SyncError::Config(e.to_string()))?;
        app.validate()?;
        Ok(app)
    }

    pub fn validate(&self) -> Result<(), SyncError> {
        let sync = &self.sync;
        if sync.doc_table.is_empty() || sync.edge_table.is_empty() {
            return Err(SyncError::Config(
                "sync.doc_table and sync.edge_table must be set".to_string(),
            ));
        }
        if sync.doc_table == sync.edge_table {
            return Err(SyncError::Config(format!(
                "sync.doc_table and sync.edge_table are both {:?}",
                sync.doc_table
            )));
        }
        if sync.cursor_id.is_empty() {
            return Err(SyncError::Config("sync.cursor_id must be set".to_string()));
        }
        Ok(())
    }

    pub fn tracked_tables(&self) -> TrackedTables {
        TrackedTables::new(&self.sync.doc_table, &self.sync.edge_table)
    }

    pub fn graph_config(&self) -> GraphConfig {
        GraphConfig {
            endpoint: self.dgraph.endpoint.clone(),
            timeout_secs: self.dgraph.timeout_secs,
        }
    }

    pub fn start_cursor(&self) -> Option<Cursor> {
        self.sync
            .start_cursor
            .as_deref()
            .filter(|c| !c.is_empty())
            .map(Cursor::from)
    }
}

//! Document cache backed by Dgraph.
//!
//! Documents are stored as a `Document` node owning `ContentGroup` and
//! `Content` child nodes. The stream cursor lives on a single `Cursor` node and
//! is written in the same transaction as every mutation, so the committed
//! graph and the resume position never disagree.
//!
//! Relations between documents use the chain's edge names as predicates.
//! Those are not part of any declared type, so `<uid> * * .` does not reach
//! them: every relation name a document takes part in is recorded in its
//! `edge_names` list, and deleting the document removes each named relation
//! in both directions explicitly.
//!
//! Fields of the row the schema does not model are kept verbatim as a JSON
//! string in `extra`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use deltagraph_core::{ChainDocument, ChainEdge, Cursor};
use deltagraph_graph::{check_predicate, GraphClient, GraphError, Mutation, Uid};

use crate::doccache::{CacheError, DocumentCache};

/// Schema applied by `init_schema`.
pub const SCHEMA: &str = r#"
    type Document {
        chain_id
        hash
        creator
        created_date
        doc_type
        content_groups
        edge_names
        extra
    }

    type ContentGroup {
        content_group_sequence
        contents
    }

    type Content {
        label
        value
        type
        content_sequence
    }

    type Cursor {
        cursor_id
        cursor
        updated_at
    }

    chain_id: int .
    hash: string @index(exact) .
    creator: string @index(term) .
    created_date: string .
    doc_type: string @index(exact) .
    content_groups: [uid] .
    edge_names: [string] .
    extra: string .
    content_group_sequence: int .
    contents: [uid] .
    label: string @index(exact) .
    value: string @index(term) .
    type: string .
    content_sequence: int .
    cursor_id: string @index(exact) .
    cursor: string .
    updated_at: datetime .
"#;

/// Types the cache writes; all must exist before ingestion starts.
pub const REQUIRED_TYPES: &[&str] = &["Document", "ContentGroup", "Content", "Cursor"];

const DOCUMENT_QUERY: &str = r#"query document($hash: string, $cursor_id: string) {
    document(func: eq(hash, $hash)) {
        uid
        edge_names
        content_groups {
            uid
            contents { uid }
        }
    }
    cursor(func: eq(cursor_id, $cursor_id)) { uid cursor }
}"#;

const ENDPOINTS_QUERY: &str = r#"query endpoints($from: string, $to: string, $cursor_id: string) {
    from(func: eq(hash, $from)) { uid }
    to(func: eq(hash, $to)) { uid }
    cursor(func: eq(cursor_id, $cursor_id)) { uid cursor }
}"#;

const CURSOR_QUERY: &str = r#"query cursor($cursor_id: string) {
    cursor(func: eq(cursor_id, $cursor_id)) { uid cursor }
}"#;

/// A node reference with whatever owned children the query asked for.
#[derive(Debug, Deserialize)]
struct NodeRef {
    uid: Uid,
    #[serde(default)]
    content_groups: Vec<NodeRef>,
    #[serde(default)]
    contents: Vec<NodeRef>,
    #[serde(default)]
    edge_names: Vec<String>,
}

impl NodeRef {
    /// Uids of every owned child node, depth first.
    fn children(&self) -> Vec<Uid> {
        let mut out = Vec::new();
        for child in self.content_groups.iter().chain(&self.contents) {
            out.push(child.uid.clone());
            out.extend(child.children());
        }
        out
    }
}

#[derive(Debug, Deserialize)]
struct CursorNode {
    uid: Uid,
    #[serde(default)]
    cursor: String,
}

#[derive(Debug, Deserialize)]
struct DocumentLookup {
    #[serde(default)]
    document: Vec<NodeRef>,
    #[serde(default)]
    cursor: Vec<CursorNode>,
}

#[derive(Debug, Deserialize)]
struct EndpointLookup {
    #[serde(default)]
    from: Vec<NodeRef>,
    #[serde(default)]
    to: Vec<NodeRef>,
    #[serde(default)]
    cursor: Vec<CursorNode>,
}

#[derive(Debug, Deserialize)]
struct CursorLookup {
    #[serde(default)]
    cursor: Vec<CursorNode>,
}

#[derive(Clone)]
pub struct GraphDocumentCache {
    client: GraphClient,
    cursor_id: String,
}

impl GraphDocumentCache {
    pub fn new(client: GraphClient, cursor_id: impl Into<String>) -> Self {
        Self {
            client,
            cursor_id: cursor_id.into(),
        }
    }

    pub fn client(&self) -> &GraphClient {
        &self.client
    }

    /// Apply the bundled schema. Safe to repeat.
    pub async fn init_schema(&self) -> Result<(), GraphError> {
        tracing::info!(endpoint = %self.client.endpoint(), "Applying graph schema");
        self.client.update_schema(SCHEMA).await
    }

    fn vars(&self, pairs: &[(&str, &str)]) -> HashMap<String, String> {
        let mut vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (format!("${k}"), v.to_string()))
            .collect();
        vars.insert("$cursor_id".to_string(), self.cursor_id.clone());
        vars
    }

    async fn lookup_document(&self, hash: &str) -> Result<DocumentLookup, CacheError> {
        let vars = self.vars(&[("hash", hash)]);
        Ok(self.client.query(DOCUMENT_QUERY, Some(&vars)).await?)
    }

    /// Subjects pointing at `node` through each relation name it recorded.
    async fn incoming_relations(
        &self,
        node: &NodeRef,
    ) -> Result<Vec<(String, Vec<Uid>)>, CacheError> {
        let Some(query) = incoming_query(&node.uid, &node.edge_names)? else {
            return Ok(Vec::new());
        };
        let mut found: HashMap<String, Vec<NodeRef>> = self.client.query(&query, None).await?;

        Ok(node
            .edge_names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let subjects = found
                    .remove(&format!("in_{i}"))
                    .unwrap_or_default()
                    .into_iter()
                    .map(|n| n.uid)
                    .collect();
                (name.clone(), subjects)
            })
            .collect())
    }

    fn cursor_mutation(&self, existing: Option<&CursorNode>, cursor: &Cursor) -> Mutation {
        Mutation::json_value(
            cursor_json(&self.cursor_id, existing.map(|c| &c.uid), cursor),
            false,
        )
    }
}

#[async_trait]
impl DocumentCache for GraphDocumentCache {
    async fn store_document(&self, doc: &ChainDocument, cursor: &Cursor) -> Result<(), CacheError> {
        let lookup = self.lookup_document(&doc.hash).await?;
        let existing = lookup.document.first();

        let mut mutations = Vec::new();
        if let Some(node) = existing {
            // Replace owned children; the document uid stays so inbound
            // relations survive the update.
            mutations.extend(node.children().iter().map(Mutation::delete_node));
            mutations.push(Mutation::delete_predicate(&node.uid, "content_groups")?);
        }
        mutations.push(Mutation::json_value(
            document_json(doc, existing.map(|n| &n.uid)),
            false,
        ));
        mutations.push(self.cursor_mutation(lookup.cursor.first(), cursor));

        let responses = self.client.mutate(&mutations).await?;
        tracing::debug!(
            hash = %doc.hash,
            replaced = existing.is_some(),
            uid = ?responses.iter().find_map(|r| r.uid("doc")),
            "Document stored"
        );
        Ok(())
    }

    async fn delete_document(&self, doc: &ChainDocument, cursor: &Cursor) -> Result<(), CacheError> {
        let lookup = self.lookup_document(&doc.hash).await?;

        let mut mutations = match lookup.document.first() {
            Some(node) => {
                let incoming = self.incoming_relations(node).await?;
                tracing::debug!(
                    hash = %doc.hash,
                    relations = node.edge_names.len(),
                    "Purging document"
                );
                purge_mutations(node, &incoming)?
            }
            None => {
                tracing::warn!(hash = %doc.hash, "Deleting unknown document");
                Vec::new()
            }
        };
        mutations.push(self.cursor_mutation(lookup.cursor.first(), cursor));

        self.client.mutate(&mutations).await?;
        Ok(())
    }

    async fn mutate_edge(
        &self,
        edge: &ChainEdge,
        delete_op: bool,
        cursor: &Cursor,
    ) -> Result<(), CacheError> {
        let vars = self.vars(&[("from", edge.from_node.as_str()), ("to", edge.to_node.as_str())]);
        let lookup: EndpointLookup = self.client.query(ENDPOINTS_QUERY, Some(&vars)).await?;

        let from = lookup.from.first().ok_or_else(|| CacheError::NotFound {
            hash: edge.from_node.clone(),
        })?;
        let to = lookup.to.first().ok_or_else(|| CacheError::NotFound {
            hash: edge.to_node.clone(),
        })?;

        let mut mutations = vec![Mutation::edge(&from.uid, &to.uid, &edge.edge_name, delete_op)?];
        if !delete_op {
            mutations.push(register_relation(&from.uid, &edge.edge_name));
            mutations.push(register_relation(&to.uid, &edge.edge_name));
        }
        mutations.push(self.cursor_mutation(lookup.cursor.first(), cursor));
        self.client.mutate(&mutations).await?;
        Ok(())
    }

    async fn last_cursor(&self) -> Result<Option<Cursor>, CacheError> {
        let vars = self.vars(&[]);
        let lookup: CursorLookup = self.client.query(CURSOR_QUERY, Some(&vars)).await?;
        Ok(lookup
            .cursor
            .into_iter()
            .map(|c| Cursor::new(c.cursor))
            .find(|c| !c.is_empty()))
    }
}

fn document_json(doc: &ChainDocument, uid: Option<&Uid>) -> Value {
    let groups: Vec<Value> = doc
        .content_groups
        .iter()
        .enumerate()
        .map(|(group_seq, group)| {
            let contents: Vec<Value> = group
                .iter()
                .enumerate()
                .map(|(seq, content)| {
                    json!({
                        "dgraph.type": "Content",
                        "label": content.label,
                        "value": content.value.render(),
                        "type": content.value.type_tag(),
                        "content_sequence": seq,
                    })
                })
                .collect();
            json!({
                "dgraph.type": "ContentGroup",
                "content_group_sequence": group_seq,
                "contents": contents,
            })
        })
        .collect();

    let mut record = json!({
        "uid": node_ref(uid, "doc"),
        "dgraph.type": "Document",
        "chain_id": doc.id,
        "hash": doc.hash,
        "creator": doc.creator,
        "created_date": doc.created_date,
        "doc_type": doc.doc_type(),
        "content_groups": groups,
    });
    if !doc.extra.is_empty() {
        record["extra"] = Value::String(Value::Object(doc.extra.clone()).to_string());
    }
    record
}

/// Record that `uid` takes part in relation `name`. The list is a set of
/// strings in Dgraph, so repeats collapse.
fn register_relation(uid: &Uid, name: &str) -> Mutation {
    Mutation::json_value(json!({ "uid": uid.to_string(), "edge_names": [name] }), false)
}

/// One block per relation name, `in_<i>`, listing the subjects that point at
/// `uid` through it. `None` when the node never took part in a relation.
fn incoming_query(uid: &Uid, names: &[String]) -> Result<Option<String>, GraphError> {
    if names.is_empty() {
        return Ok(None);
    }
    let mut query = String::from("{\n");
    for (i, name) in names.iter().enumerate() {
        check_predicate(name)?;
        query.push_str(&format!(
            "    in_{i}(func: has(<{name}>)) @filter(uid_in(<{name}>, {uid})) {{ uid }}\n"
        ));
    }
    query.push('}');
    Ok(Some(query))
}

/// Everything that removes a document: owned children, relations in both
/// directions, then the node itself.
fn purge_mutations(
    node: &NodeRef,
    incoming: &[(String, Vec<Uid>)],
) -> Result<Vec<Mutation>, GraphError> {
    let mut mutations: Vec<Mutation> = node.children().iter().map(Mutation::delete_node).collect();
    for name in &node.edge_names {
        mutations.push(Mutation::delete_predicate(&node.uid, name)?);
    }
    for (name, subjects) in incoming {
        for subject in subjects {
            mutations.push(Mutation::edge(subject, &node.uid, name, true)?);
        }
    }
    mutations.push(Mutation::delete_node(&node.uid));
    Ok(mutations)
}

fn cursor_json(cursor_id: &str, uid: Option<&Uid>, cursor: &Cursor) -> Value {
    json!({
        "uid": node_ref(uid, "cursor"),
        "dgraph.type": "Cursor",
        "cursor_id": cursor_id,
        "cursor": cursor.as_str(),
        "updated_at": Utc::now().to_rfc3339(),
    })
}

/// Existing uid, or a blank node named `blank`.
fn node_ref(uid: Option<&Uid>, blank: &str) -> String {
    uid.map_or_else(|| format!("_:{blank}"), Uid::to_string)
}

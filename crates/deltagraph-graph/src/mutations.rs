//! Write operations for the graph.
//!
//! `Mutation` is the pure builder: structured JSON set/delete payloads and raw
//! N-Quads. The `GraphClient` helpers below wrap single mutations in their own
//! transaction; callers that need several statements to land together build
//! the mutations and pass them to `GraphClient::mutate` in one call.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::{GraphClient, GraphError};

// ── Uid ──────────────────────────────────────────────────────────

/// Store-assigned node identifier, e.g. `0x4e21`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Uid(String);

impl Uid {
    pub fn parse(raw: &str) -> Result<Self, GraphError> {
        let digits = raw
            .strip_prefix("0x")
            .or_else(|| raw.strip_prefix("0X"))
            .ok_or_else(|| GraphError::InvalidUid(raw.to_string()))?;
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(GraphError::InvalidUid(raw.to_string()));
        }
        Ok(Self(raw.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Uid {
    type Error = GraphError;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw)
    }
}

impl From<Uid> for String {
    fn from(uid: Uid) -> Self {
        uid.0
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Mutation ─────────────────────────────────────────────────────

/// One mutation as sent to `/mutate`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Mutation {
    #[serde(rename = "set", skip_serializing_if = "Option::is_none")]
    pub set_json: Option<Value>,
    #[serde(rename = "delete", skip_serializing_if = "Option::is_none")]
    pub delete_json: Option<Value>,
    #[serde(rename = "setNquads", skip_serializing_if = "Option::is_none")]
    pub set_nquads: Option<String>,
    #[serde(rename = "delNquads", skip_serializing_if = "Option::is_none")]
    pub del_nquads: Option<String>,
}

impl Mutation {
    /// Structured mutation from any serializable record. `delete_op` turns the
    /// payload into a delete of the listed fields instead of a set.
    pub fn json<T: Serialize>(value: &T, delete_op: bool) -> Result<Self, GraphError> {
        let value =
            serde_json::to_value(value).map_err(|e| GraphError::Serialization(e.to_string()))?;
        Ok(Self::json_value(value, delete_op))
    }

    /// Structured mutation from already-serialized JSON.
    pub fn json_bytes(bytes: &[u8], delete_op: bool) -> Result<Self, GraphError> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| GraphError::Serialization(e.to_string()))?;
        Ok(Self::json_value(value, delete_op))
    }

    pub fn json_value(value: Value, delete_op: bool) -> Self {
        if delete_op {
            Self {
                delete_json: Some(value),
                ..Default::default()
            }
        } else {
            Self {
                set_json: Some(value),
                ..Default::default()
            }
        }
    }

    /// Raw N-Quads mutation.
    pub fn nquads(nquads: impl Into<String>, delete_op: bool) -> Self {
        if delete_op {
            Self {
                del_nquads: Some(nquads.into()),
                ..Default::default()
            }
        } else {
            Self {
                set_nquads: Some(nquads.into()),
                ..Default::default()
            }
        }
    }

    pub fn delete_nquads(nquads: impl Into<String>) -> Self {
        Self::nquads(nquads, true)
    }

    /// Delete every statement with `uid` as subject. This is the only way a
    /// node is purged.
    pub fn delete_node(uid: &Uid) -> Self {
        Self::delete_nquads(format!("<{uid}> * * ."))
    }

    /// Delete every object of one predicate on `uid`.
    pub fn delete_predicate(uid: &Uid, predicate: &str) -> Result<Self, GraphError> {
        check_predicate(predicate)?;
        Ok(Self::delete_nquads(format!("<{uid}> <{predicate}> * .")))
    }

    /// Add or remove the single relation `from --edge_name--> to`, leaving
    /// every other statement on both nodes untouched.
    pub fn edge(from: &Uid, to: &Uid, edge_name: &str, delete_op: bool) -> Result<Self, GraphError> {
        check_predicate(edge_name)?;
        Ok(Self::nquads(edge_triple(from, to, edge_name), delete_op))
    }

    pub fn is_empty(&self) -> bool {
        self.set_json.is_none()
            && self.delete_json.is_none()
            && self.set_nquads.is_none()
            && self.del_nquads.is_none()
    }
}

/// The part of a mutation response callers use: uids for blank nodes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MutationResponse {
    #[serde(default)]
    pub uids: HashMap<String, String>,
}

impl MutationResponse {
    /// Uid assigned to blank node `_:name`.
    pub fn uid(&self, blank_node: &str) -> Option<Uid> {
        self.uids.get(blank_node).and_then(|raw| Uid::parse(raw).ok())
    }
}

impl GraphClient {
    /// Apply a single mutation in its own transaction.
    pub async fn mutate_one(&self, mutation: Mutation) -> Result<MutationResponse, GraphError> {
        let mut responses = self.mutate(std::slice::from_ref(&mutation)).await?;
        responses
            .pop()
            .ok_or_else(|| GraphError::Mutation("empty mutation response".to_string()))
    }

    pub async fn mutate_json<T: Serialize>(
        &self,
        value: &T,
        delete_op: bool,
    ) -> Result<MutationResponse, GraphError> {
        self.mutate_one(Mutation::json(value, delete_op)?).await
    }

    pub async fn mutate_json_bytes(
        &self,
        bytes: &[u8],
        delete_op: bool,
    ) -> Result<MutationResponse, GraphError> {
        self.mutate_one(Mutation::json_bytes(bytes, delete_op)?).await
    }

    pub async fn mutate_nquads(
        &self,
        nquads: &str,
        delete_op: bool,
    ) -> Result<MutationResponse, GraphError> {
        self.mutate_one(Mutation::nquads(nquads, delete_op)).await
    }

    pub async fn delete_nquads(&self, nquads: &str) -> Result<MutationResponse, GraphError> {
        self.mutate_one(Mutation::delete_nquads(nquads)).await
    }

    pub async fn delete_node(&self, uid: &Uid) -> Result<MutationResponse, GraphError> {
        self.mutate_one(Mutation::delete_node(uid)).await
    }

    pub async fn mutate_edge(
        &self,
        from: &Uid,
        to: &Uid,
        edge_name: &str,
        delete_op: bool,
    ) -> Result<MutationResponse, GraphError> {
        self.mutate_one(Mutation::edge(from, to, edge_name, delete_op)?)
            .await
    }
}

// ── Helpers ──────────────────────────────────────────────────────

fn edge_triple(from: &Uid, to: &Uid, edge_name: &str) -> String {
    format!("<{from}> <{edge_name}> <{to}> .")
}

/// Predicate and type names: no whitespace, no N-Quads or query delimiters.
pub(crate) fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | '-' | ':' | '/' | '~'))
}

/// Reject names that cannot be spliced into N-Quads or a query.
pub fn check_predicate(name: &str) -> Result<(), GraphError> {
    if is_valid_name(name) {
        Ok(())
    } else {
        Err(GraphError::InvalidPredicate(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn uid(raw: &str) -> Uid {
        Uid::parse(raw).unwrap()
    }

    #[test]
    fn test_uid_validation() {
        assert_eq!(uid("0x4E21").as_str(), "0x4e21");
        assert!(Uid::parse("4e21").is_err());
        assert!(Uid::parse("0x").is_err());
        assert!(Uid::parse("0xzz").is_err());
        assert!(Uid::parse("_:doc").is_err());

        let parsed: Uid = serde_json::from_str("\"0x1f\"").unwrap();
        assert_eq!(parsed, uid("0x1f"));
        assert!(serde_json::from_str::<Uid>("\"doc\"").is_err());
    }

    #[test]
    fn test_json_mutation_selects_set_or_delete() {
        let record = json!({"uid": "0x1", "label": "x"});

        let set = Mutation::json(&record, false).unwrap();
        assert_eq!(set.set_json, Some(record.clone()));
        assert!(set.delete_json.is_none());

        let del = Mutation::json_bytes(record.to_string().as_bytes(), true).unwrap();
        assert_eq!(del.delete_json, Some(record));
        assert!(del.set_json.is_none());

        assert!(matches!(
            Mutation::json_bytes(b"{not json", false),
            Err(GraphError::Serialization(_))
        ));
    }

    #[test]
    fn test_wire_format_keys() {
        let m = Mutation::nquads("<0x1> <name> \"a\" .", false);
        let wire = serde_json::to_value(&m).unwrap();
        assert_eq!(wire, json!({"setNquads": "<0x1> <name> \"a\" ."}));

        let m = Mutation::json_value(json!({"uid": "0x1"}), true);
        let wire = serde_json::to_value(&m).unwrap();
        assert_eq!(wire, json!({"delete": {"uid": "0x1"}}));
    }

    #[test]
    fn test_delete_node_is_wildcard() {
        let m = Mutation::delete_node(&uid("0x2a"));
        assert_eq!(m.del_nquads.as_deref(), Some("<0x2a> * * ."));
        assert!(m.set_nquads.is_none());
    }

    #[test]
    fn test_edge_mutation() {
        let add = Mutation::edge(&uid("0x1"), &uid("0x2"), "contents", false).unwrap();
        assert_eq!(add.set_nquads.as_deref(), Some("<0x1> <contents> <0x2> ."));

        let remove = Mutation::edge(&uid("0x1"), &uid("0x2"), "contents", true).unwrap();
        assert_eq!(remove.del_nquads.as_deref(), Some("<0x1> <contents> <0x2> ."));

        assert!(matches!(
            Mutation::edge(&uid("0x1"), &uid("0x2"), "bad name> <x", false),
            Err(GraphError::InvalidPredicate(_))
        ));
    }

    #[test]
    fn test_delete_predicate() {
        let m = Mutation::delete_predicate(&uid("0x3"), "content_groups").unwrap();
        assert_eq!(m.del_nquads.as_deref(), Some("<0x3> <content_groups> * ."));
    }

    #[test]
    fn test_response_uid_lookup() {
        let response: MutationResponse =
            serde_json::from_value(json!({"code": "Success", "uids": {"doc": "0x10", "bad": "x"}}))
                .unwrap();
        assert_eq!(response.uid("doc"), Some(uid("0x10")));
        assert_eq!(response.uid("bad"), None);
        assert_eq!(response.uid("missing"), None);
    }

    #[test]
    fn test_empty_mutation() {
        assert!(Mutation::default().is_empty());
        assert!(!Mutation::delete_nquads("<0x1> * * .").is_empty());
    }
}

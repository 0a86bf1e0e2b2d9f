//! Schema introspection.
//!
//! Used at startup to confirm that the types the mirror writes exist before
//! any delta is applied.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::client::{GraphClient, GraphError};
use crate::mutations::is_valid_name;

/// A field (predicate) declared on a schema type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
}

/// A declared node type and its fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaType {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<SchemaField>,
}

/// The `data` block of a `schema(type: [...]) {}` query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaTypes {
    #[serde(default)]
    pub types: Vec<SchemaType>,
}

impl GraphClient {
    /// Fetch the requested type definitions. Undeclared types are simply
    /// absent from the result.
    pub async fn get_types<S: AsRef<str>>(&self, names: &[S]) -> Result<SchemaTypes, GraphError> {
        if names.is_empty() {
            return Ok(SchemaTypes::default());
        }
        let q = schema_query(names)?;
        self.query(&q, None).await
    }

    pub async fn get_type(&self, name: &str) -> Result<Option<SchemaType>, GraphError> {
        let schema_types = self.get_types(&[name]).await?;
        Ok(schema_types.types.into_iter().find(|t| t.name == name))
    }

    /// The subset of `names` not declared in the schema, in request order.
    pub async fn missing_types<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<String>, GraphError> {
        let schema_types = self.get_types(names).await?;
        Ok(missing_from(names, &schema_types))
    }

    /// Fields of `name` keyed by field name.
    pub async fn get_type_field_map(
        &self,
        name: &str,
    ) -> Result<HashMap<String, SchemaField>, GraphError> {
        let schema_type = self
            .get_type(name)
            .await?
            .ok_or_else(|| GraphError::NotFound(name.to_string()))?;
        Ok(field_map(schema_type))
    }
}

fn schema_query<S: AsRef<str>>(names: &[S]) -> Result<String, GraphError> {
    let mut list = Vec::with_capacity(names.len());
    for name in names {
        let name = name.as_ref();
        if !is_valid_name(name) {
            return Err(GraphError::Query(format!("invalid type name: {name:?}")));
        }
        list.push(name);
    }
    Ok(format!("schema(type: [{}]) {{}}", list.join(", ")))
}

fn missing_from<S: AsRef<str>>(names: &[S], found: &SchemaTypes) -> Vec<String> {
    let declared: HashSet<&str> = found.types.iter().map(|t| t.name.as_str()).collect();
    names
        .iter()
        .map(AsRef::as_ref)
        .filter(|name| !declared.contains(name))
        .map(str::to_string)
        .collect()
}

fn field_map(schema_type: SchemaType) -> HashMap<String, SchemaField> {
    schema_type
        .fields
        .into_iter()
        .map(|f| (f.name.clone(), f))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SchemaTypes {
        serde_json::from_str(
            r#"{"types": [
                {"fields": [{"name": "hash"}, {"name": "creator"}, {"name": "content_groups"}], "name": "Document"},
                {"fields": [{"name": "label"}], "name": "Content"}
            ]}"#,
        )
        .unwrap()
    }

    #[test]
    fn test_schema_query_text() {
        let q = schema_query(&["Document", "Content"]).unwrap();
        assert_eq!(q, "schema(type: [Document, Content]) {}");

        assert!(matches!(
            schema_query(&["Document]) { x }"]),
            Err(GraphError::Query(_))
        ));
    }

    #[test]
    fn test_missing_types_preserves_request_order() {
        let missing = missing_from(&["Cursor", "Document", "ContentGroup", "Content"], &sample());
        assert_eq!(missing, vec!["Cursor".to_string(), "ContentGroup".to_string()]);

        let none: Vec<String> = missing_from(&["Document"], &sample());
        assert!(none.is_empty());
    }

    #[test]
    fn test_empty_schema_response() {
        // Dgraph answers `{}` when none of the requested types exist.
        let found: SchemaTypes = serde_json::from_str("{}").unwrap();
        assert_eq!(missing_from(&["Document"], &found), vec!["Document".to_string()]);
    }

    #[test]
    fn test_field_map() {
        let doc = sample().types.remove(0);
        let fields = field_map(doc);
        assert_eq!(fields.len(), 3);
        assert_eq!(
            fields.get("content_groups"),
            Some(&SchemaField {
                name: "content_groups".to_string()
            })
        );
    }
}

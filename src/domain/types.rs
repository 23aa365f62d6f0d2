//! Content type definitions and the per-render metadata snapshot.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeInfo {
    #[serde(default)]
    pub is_view_element: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeDefinition {
    pub name: String,
    #[serde(default)]
    pub info: TypeInfo,
    /// Markup used to render one list element; bound with the element as `model`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default)]
    pub client_fn: Map<String, Value>,
    #[serde(default)]
    pub server_fn: Vec<String>,
}

/// Snapshot entry for one type.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub list: Option<Vec<Value>>,
    pub template: Option<String>,
    pub client_fn: Map<String, Value>,
    pub server_fn: Vec<String>,
    pub info: TypeInfo,
}

impl TypeEntry {
    pub fn new(definition: TypeDefinition, list: Option<Vec<Value>>) -> Self {
        Self {
            list,
            template: definition.template,
            client_fn: definition.client_fn,
            server_fn: definition.server_fn,
            info: definition.info,
        }
    }

    /// List element whose `id` (or `_id`) equals `reference`. Numeric ids
    /// match their decimal form.
    pub fn find(&self, reference: &str) -> Option<&Value> {
        self.list.as_deref()?.iter().find(|item| {
            ["id", "_id"].iter().any(|key| match item.get(key) {
                Some(Value::String(id)) => id == reference,
                Some(Value::Number(id)) => id.to_string() == reference,
                _ => false,
            })
        })
    }
}

/// Type name to entry, built fresh for every render.
pub type TypeMetadata = BTreeMap<String, TypeEntry>;

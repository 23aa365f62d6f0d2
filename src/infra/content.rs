//! Content stores backing type definitions and lists.

use std::{
    collections::BTreeMap,
    io,
    path::{Path, PathBuf},
    sync::RwLock,
};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::{
    application::repos::{ContentStore, StoreError},
    domain::types::TypeDefinition,
    util::lock::{rw_read, rw_write},
};

pub const TYPES_DIR: &str = ".types";

#[derive(Deserialize)]
struct TypeFile {
    #[serde(flatten)]
    definition: TypeDefinition,
    #[serde(default)]
    list: Vec<Value>,
}

/// Reads `<site>/.types/<Type>.json` on every call.
///
/// Each file holds a type definition plus its `list` of elements.
#[derive(Debug, Clone)]
pub struct JsonContentStore {
    types_dir: PathBuf,
}

impl JsonContentStore {
    pub fn new(site_base: impl AsRef<Path>) -> Self {
        Self {
            types_dir: site_base.as_ref().join(TYPES_DIR),
        }
    }

    async fn read_type(&self, path: &Path) -> Result<TypeFile, StoreError> {
        let location = path.display().to_string();
        let text = tokio::fs::read_to_string(path).await.map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => StoreError::NotFound(location.clone()),
            _ => StoreError::from_storage(err),
        })?;
        serde_json::from_str(&text).map_err(|err| StoreError::invalid(location, err))
    }
}

fn valid_type_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-'))
}

#[async_trait]
impl ContentStore for JsonContentStore {
    async fn type_definitions(&self) -> Result<Vec<TypeDefinition>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.types_dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StoreError::from_storage(err)),
        };

        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(StoreError::from_storage)? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut definitions = Vec::with_capacity(paths.len());
        for path in paths {
            definitions.push(self.read_type(&path).await?.definition);
        }
        Ok(definitions)
    }

    async fn list(&self, type_name: &str) -> Result<Vec<Value>, StoreError> {
        if !valid_type_name(type_name) {
            return Err(StoreError::invalid(type_name, "invalid type name"));
        }
        let path = self.types_dir.join(format!("{type_name}.json"));
        Ok(self.read_type(&path).await?.list)
    }
}

/// In-process store, mostly for tests and embedding.
#[derive(Default)]
pub struct MemoryContentStore {
    types: RwLock<BTreeMap<String, (TypeDefinition, Vec<Value>)>>,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(self, definition: TypeDefinition, list: Vec<Value>) -> Self {
        self.insert(definition, list);
        self
    }

    pub fn insert(&self, definition: TypeDefinition, list: Vec<Value>) {
        rw_write(&self.types, "infra::content", "insert")
            .insert(definition.name.clone(), (definition, list));
    }

    pub fn set_list(&self, type_name: &str, list: Vec<Value>) -> Result<(), StoreError> {
        let mut types = rw_write(&self.types, "infra::content", "set_list");
        let entry = types
            .get_mut(type_name)
            .ok_or_else(|| StoreError::NotFound(type_name.to_string()))?;
        entry.1 = list;
        Ok(())
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn type_definitions(&self) -> Result<Vec<TypeDefinition>, StoreError> {
        Ok(rw_read(&self.types, "infra::content", "type_definitions")
            .values()
            .map(|(definition, _)| definition.clone())
            .collect())
    }

    async fn list(&self, type_name: &str) -> Result<Vec<Value>, StoreError> {
        rw_read(&self.types, "infra::content", "list")
            .get(type_name)
            .map(|(_, list)| list.clone())
            .ok_or_else(|| StoreError::NotFound(type_name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn reads_definitions_and_lists_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let types = dir.path().join(TYPES_DIR);
        fs::create_dir(&types).unwrap();
        fs::write(
            types.join("Article.json"),
            json!({
                "name": "Article",
                "info": {"isViewElement": true},
                "template": "<h2>{{ model.title }}</h2>",
                "list": [{"id": "a1", "title": "First"}]
            })
            .to_string(),
        )
        .unwrap();
        fs::write(types.join("notes.txt"), "ignored").unwrap();

        let store = JsonContentStore::new(dir.path());
        let definitions = store.type_definitions().await.unwrap();
        assert_eq!(definitions.len(), 1);
        assert_eq!(definitions[0].name, "Article");
        assert_eq!(store.list("Article").await.unwrap().len(), 1);

        fs::write(
            types.join("Article.json"),
            json!({"name": "Article", "list": []}).to_string(),
        )
        .unwrap();
        assert!(store.list("Article").await.unwrap().is_empty());

        assert!(matches!(store.list("Missing").await, Err(StoreError::NotFound(_))));
        assert!(matches!(
            store.list("../etc").await,
            Err(StoreError::InvalidData { .. })
        ));
    }

    #[tokio::test]
    async fn missing_types_directory_is_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonContentStore::new(dir.path());
        assert!(store.type_definitions().await.unwrap().is_empty());
    }
}

use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::{
    application::repos::{ContentStore, StoreError},
    domain::types::{TypeEntry, TypeMetadata},
    util::lock::{rw_read, rw_write},
};

/// Per-render builder for [`TypeMetadata`].
///
/// `init` loads every type definition and, for types flagged as view
/// elements, their current lists. Never shared between renders.
pub struct TypesBuilder {
    store: Arc<dyn ContentStore>,
    types: RwLock<TypeMetadata>,
}

impl TypesBuilder {
    pub fn new(store: Arc<dyn ContentStore>) -> Self {
        Self {
            store,
            types: RwLock::new(TypeMetadata::new()),
        }
    }

    pub async fn init(&self) -> Result<(), StoreError> {
        let mut types = TypeMetadata::new();
        for definition in self.store.type_definitions().await? {
            let list = if definition.info.is_view_element {
                Some(self.store.list(&definition.name).await?)
            } else {
                None
            };
            types.insert(definition.name.clone(), TypeEntry::new(definition, list));
        }

        debug!(
            target = "vellum::application::types",
            types = types.len(),
            "type metadata loaded"
        );
        *rw_write(&self.types, "application::types", "init") = types;
        Ok(())
    }

    pub fn get(&self, type_name: &str) -> Option<TypeEntry> {
        rw_read(&self.types, "application::types", "get")
            .get(type_name)
            .cloned()
    }

    pub fn snapshot(&self) -> TypeMetadata {
        rw_read(&self.types, "application::types", "snapshot").clone()
    }
}

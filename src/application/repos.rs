//! Repository traits describing the content and site adapters.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::domain::{content::PageContent, site::SiteTree, types::TypeDefinition};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage error: {0}")]
    Storage(String),
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("invalid stored data in `{location}`: {message}")]
    InvalidData { location: String, message: String },
}

impl StoreError {
    pub fn from_storage(err: impl std::fmt::Display) -> Self {
        Self::Storage(err.to_string())
    }

    pub fn invalid(location: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::InvalidData {
            location: location.into(),
            message: message.to_string(),
        }
    }
}

/// Read access to type definitions and their element lists. Implementations
/// must reflect current persisted content on every call.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn type_definitions(&self) -> Result<Vec<TypeDefinition>, StoreError>;

    async fn list(&self, type_name: &str) -> Result<Vec<Value>, StoreError>;
}

/// The file-backed site: container directories, page descriptors and
/// template files.
#[async_trait]
pub trait SiteRepo: Send + Sync {
    /// Rescan the site map.
    async fn site_tree(&self) -> Result<SiteTree, StoreError>;

    /// Page descriptor of the container directory at `container_path`.
    async fn page_content(&self, container_path: &str) -> Result<PageContent, StoreError>;

    /// Template markup at `path`, relative to the site base.
    async fn template(&self, path: &str) -> Result<String, StoreError>;
}

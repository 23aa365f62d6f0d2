//! Named server functions callable from templates through `cms-fn`.

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use thiserror::Error;

use crate::application::repos::{ContentStore, StoreError};

#[derive(Debug, Error)]
pub enum ServerFnError {
    #[error("unknown server function `{0}`")]
    Unknown(String),
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[async_trait]
pub trait ServerFunction: Send + Sync {
    fn name(&self) -> &str;

    /// Setup metadata published to the authoring UI, if any.
    fn describe(&self) -> Option<Value> {
        None
    }

    async fn call(&self, args: Vec<Value>) -> Result<Value, ServerFnError>;
}

/// Registry of server functions, ordered by name.
#[derive(Clone, Default)]
pub struct ServerFunctions {
    functions: BTreeMap<String, Arc<dyn ServerFunction>>,
}

impl ServerFunctions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in functions.
    pub fn with_builtins(store: Arc<dyn ContentStore>) -> Self {
        let mut functions = Self::new();
        functions.register(CountFunction { store });
        functions
    }

    pub fn register(&mut self, function: impl ServerFunction + 'static) {
        self.functions
            .insert(function.name().to_string(), Arc::new(function));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ServerFunction>> {
        self.functions.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.functions.keys().cloned().collect()
    }

    pub fn setup(&self) -> Map<String, Value> {
        self.functions
            .iter()
            .filter_map(|(name, function)| function.describe().map(|setup| (name.clone(), setup)))
            .collect()
    }

    pub async fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, ServerFnError> {
        let function = self
            .get(name)
            .ok_or_else(|| ServerFnError::Unknown(name.to_string()))?;
        function.call(args).await
    }
}

/// `count(type)`: number of elements in a type's list.
struct CountFunction {
    store: Arc<dyn ContentStore>,
}

#[async_trait]
impl ServerFunction for CountFunction {
    fn name(&self) -> &str {
        "count"
    }

    fn describe(&self) -> Option<Value> {
        Some(json!({"args": [{"name": "type", "kind": "type"}]}))
    }

    async fn call(&self, args: Vec<Value>) -> Result<Value, ServerFnError> {
        let type_name = args
            .first()
            .and_then(Value::as_str)
            .ok_or_else(|| ServerFnError::InvalidArgs("expected a type name".to_string()))?;
        let list = self.store.list(type_name).await?;
        Ok(Value::from(list.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::content::MemoryContentStore;

    struct Echo;

    #[async_trait]
    impl ServerFunction for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn call(&self, args: Vec<Value>) -> Result<Value, ServerFnError> {
            Ok(Value::Array(args))
        }
    }

    #[tokio::test]
    async fn builtins_and_registered_functions() {
        let definition = serde_json::from_value(json!({"name": "Article"})).unwrap();
        let store = MemoryContentStore::new().with_type(definition, vec![json!({}), json!({})]);
        let mut functions = ServerFunctions::with_builtins(Arc::new(store));
        functions.register(Echo);

        assert_eq!(functions.names(), vec!["count", "echo"]);
        assert_eq!(functions.setup().len(), 1);
        assert_eq!(functions.call("count", vec![json!("Article")]).await.unwrap(), json!(2));
        assert_eq!(functions.call("echo", vec![json!(1)]).await.unwrap(), json!([1]));
        assert!(matches!(
            functions.call("missing", vec![]).await,
            Err(ServerFnError::Unknown(_))
        ));
        assert!(matches!(
            functions.call("count", vec![]).await,
            Err(ServerFnError::InvalidArgs(_))
        ));
    }
}

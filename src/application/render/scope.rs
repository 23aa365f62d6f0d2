use std::{
    any::{Any, TypeId},
    collections::{HashMap, HashSet},
    fmt,
    future::Future,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use futures::future::BoxFuture;
use serde_json::{Map, Value};
use tracing::trace;

use super::{error::BindingError, expr::Resolve};

static NEXT_SCOPE_ID: AtomicU64 = AtomicU64::new(1);

type Capability = Arc<dyn Any + Send + Sync>;

/// Values and capabilities seeded before any binding happens.
///
/// Every compiled template owns its own root layer, so seeding one render
/// never leaks into a concurrent one.
#[derive(Clone, Default)]
pub struct RootScope {
    values: Map<String, Value>,
    capabilities: HashMap<TypeId, Capability>,
}

impl RootScope {
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Attach a typed service directives can look up while linking.
    pub fn provide<T: Any + Send + Sync>(&mut self, capability: Arc<T>) {
        self.capabilities.insert(TypeId::of::<T>(), capability);
    }

    pub fn capability<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.capabilities
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|capability| capability.downcast::<T>().ok())
    }
}

/// Transient binding context owned by exactly one invocation.
#[derive(Clone)]
pub struct Scope {
    id: u64,
    locals: Map<String, Value>,
    root: RootScope,
    globals: Arc<Map<String, Value>>,
    results: HashMap<String, Value>,
}

impl Scope {
    pub(crate) fn new(globals: Arc<Map<String, Value>>) -> Self {
        Self {
            id: NEXT_SCOPE_ID.fetch_add(1, Ordering::Relaxed),
            locals: Map::new(),
            root: RootScope::default(),
            globals,
            results: HashMap::new(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn root(&self) -> &RootScope {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut RootScope {
        &mut self.root
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.locals.insert(key.into(), value);
    }

    /// Copy the properties of an invocation context onto the scope.
    pub fn merge(&mut self, context: Value) -> Result<(), BindingError> {
        match context {
            Value::Object(map) => {
                self.locals.extend(map);
                Ok(())
            }
            Value::Null => Ok(()),
            Value::Bool(_) => Err(BindingError::Context("a boolean")),
            Value::Number(_) => Err(BindingError::Context("a number")),
            Value::String(_) => Err(BindingError::Context("a string")),
            Value::Array(_) => Err(BindingError::Context("an array")),
        }
    }

    pub fn capability<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.root.capability::<T>()
    }

    /// Outcome of a drained call, keyed by the call's target.
    pub fn result(&self, key: &str) -> Option<&Value> {
        self.results.get(key)
    }

    pub(crate) fn store_result(&mut self, key: String, value: Value) {
        self.results.insert(key, value);
    }

    pub(crate) fn destroy(self) {
        trace!(
            target = "vellum::render::scope",
            scope = self.id,
            results = self.results.len(),
            "scope destroyed"
        );
    }
}

impl Resolve for Scope {
    fn resolve(&self, key: &str) -> Option<&Value> {
        self.locals
            .get(key)
            .or_else(|| self.root.values.get(key))
            .or_else(|| self.globals.get(key))
    }
}

/// What a binding pass reads names from: the invocation scope, optionally
/// shadowed by a chain of single-name layers for nested templates such as
/// components and container items.
#[derive(Clone, Copy)]
pub struct ScopeView<'a> {
    base: &'a Scope,
    layer: Option<&'a Layer<'a>>,
}

/// One extra local name over a parent view.
pub struct Layer<'a> {
    parent: ScopeView<'a>,
    key: String,
    value: Value,
}

impl<'a> ScopeView<'a> {
    pub fn new(base: &'a Scope) -> Self {
        Self { base, layer: None }
    }

    /// The invocation scope underneath every layer.
    pub fn base(&self) -> &'a Scope {
        self.base
    }

    /// A layer binding `key` over this view. The parent is borrowed, not
    /// copied; bind against it with [`Layer::view`].
    pub fn overlay(self, key: impl Into<String>, value: Value) -> Layer<'a> {
        Layer {
            parent: self,
            key: key.into(),
            value,
        }
    }

    pub fn capability<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.base.capability::<T>()
    }

    pub fn result(&self, key: &str) -> Option<&'a Value> {
        self.base.result(key)
    }
}

impl Layer<'_> {
    pub fn view(&self) -> ScopeView<'_> {
        ScopeView {
            base: self.parent.base,
            layer: Some(self),
        }
    }
}

impl Resolve for ScopeView<'_> {
    fn resolve(&self, key: &str) -> Option<&Value> {
        let mut layer = self.layer;
        while let Some(current) = layer {
            if current.key == key {
                return Some(&current.value);
            }
            layer = current.parent.layer;
        }
        self.base.resolve(key)
    }
}

pub type CallFuture = BoxFuture<'static, Result<Option<Value>, BindingError>>;

/// Deferred server-side work discovered during a binding pass.
pub struct PendingCall {
    name: String,
    args: Vec<Value>,
    target: Option<String>,
    task: CallFuture,
}

impl PendingCall {
    pub fn new<F>(name: impl Into<String>, args: Vec<Value>, task: F) -> Self
    where
        F: Future<Output = Result<Option<Value>, BindingError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            args,
            target: None,
            task: Box::pin(task),
        }
    }

    /// Store the call's outcome under `key` in the scope's result table.
    pub fn storing_into(mut self, key: impl Into<String>) -> Self {
        self.target = Some(key.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub(crate) fn into_parts(self) -> (String, Option<String>, CallFuture) {
        (self.name, self.target, self.task)
    }
}

impl fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCall")
            .field("name", &self.name)
            .field("args", &self.args)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

/// Calls queued during one binding pass. Owned by a single invocation.
#[derive(Debug, Default)]
pub struct CallQueue {
    calls: Vec<PendingCall>,
    targets: HashSet<String>,
}

impl CallQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a call. A second call for a target already queued in this
    /// generation is dropped and `false` is returned.
    pub fn push(&mut self, call: PendingCall) -> bool {
        if let Some(target) = call.target()
            && !self.targets.insert(target.to_string())
        {
            return false;
        }
        self.calls.push(call);
        true
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Take the current generation, leaving the queue empty.
    pub fn take(&mut self) -> Vec<PendingCall> {
        self.targets.clear();
        std::mem::take(&mut self.calls)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    struct Marker(&'static str);

    #[test]
    fn lookups_fall_through_locals_root_and_globals() {
        let mut globals = Map::new();
        globals.insert("site".into(), json!("global"));
        globals.insert("title".into(), json!("global title"));
        let mut scope = Scope::new(Arc::new(globals));
        scope.root_mut().insert("title", json!("root title"));
        scope.root_mut().insert("lang", json!("en"));
        scope.set("lang", json!("fr"));

        assert_eq!(scope.resolve("site"), Some(&json!("global")));
        assert_eq!(scope.resolve("title"), Some(&json!("root title")));
        assert_eq!(scope.resolve("lang"), Some(&json!("fr")));
        assert_eq!(scope.resolve("missing"), None);
    }

    #[test]
    fn merge_accepts_objects_and_null_only() {
        let mut scope = Scope::new(Arc::default());
        scope.merge(json!({"x": 1})).unwrap();
        scope.merge(Value::Null).unwrap();
        assert_eq!(scope.resolve("x"), Some(&json!(1)));
        assert!(matches!(
            scope.merge(json!([1])),
            Err(BindingError::Context("an array"))
        ));
    }

    #[test]
    fn capabilities_are_typed() {
        let mut scope = Scope::new(Arc::default());
        scope.root_mut().provide(Arc::new(Marker("builder")));
        assert_eq!(scope.capability::<Marker>().map(|m| m.0), Some("builder"));
        assert!(scope.capability::<String>().is_none());
    }

    #[test]
    fn queue_deduplicates_targets_within_a_generation() {
        let mut queue = CallQueue::new();
        let call = |name: &str| PendingCall::new(name, vec![], async { Ok(None) });

        assert!(queue.push(call("a").storing_into("fn:a")));
        assert!(!queue.push(call("a").storing_into("fn:a")));
        assert!(queue.push(call("b")));
        assert!(queue.push(call("b")));
        assert_eq!(queue.len(), 3);

        let generation = queue.take();
        assert_eq!(generation.len(), 3);
        assert!(queue.is_empty());
        assert!(queue.push(call("a").storing_into("fn:a")));
    }

    #[test]
    fn layers_shadow_without_copying_the_scope() {
        let mut scope = Scope::new(Arc::default());
        scope.set("model", json!("outer"));
        scope.set("title", json!("page"));
        scope.store_result("fn:a".to_string(), json!(1));

        let view = ScopeView::new(&scope);
        let item = view.overlay("model", json!({"id": "a1"}));
        let attrs = item.view().overlay("attrs", json!({"title": "card"}));
        let inner = attrs.view();

        assert_eq!(inner.resolve("attrs"), Some(&json!({"title": "card"})));
        assert_eq!(inner.resolve("model"), Some(&json!({"id": "a1"})));
        assert_eq!(inner.resolve("title"), Some(&json!("page")));
        assert_eq!(inner.result("fn:a"), Some(&json!(1)));
        assert_eq!(view.resolve("model"), Some(&json!("outer")));
    }

    #[test]
    fn scope_ids_are_unique() {
        let first = Scope::new(Arc::default());
        let second = Scope::new(Arc::default());
        assert_ne!(first.id(), second.id());
    }
}

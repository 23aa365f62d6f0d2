use std::{
    path::PathBuf,
    sync::{Arc, OnceLock},
};

use serde_json::{Map, Value};
use tokio::runtime::Handle;
use tracing::{error, info};

use super::{
    binding::Linker,
    compiled::{CompiledTemplate, TemplateSource},
    environment::EnvironmentHandle,
    error::{BindingError, EngineError, ModuleError},
    expr::{Filters, Interpolation, Resolve},
    module::{CORE_MODULE, ModuleDescriptor},
    scope::{RootScope, Scope},
    signal::ReadySignal,
};

/// Output of injector resolution.
pub struct Services {
    globals: Arc<Map<String, Value>>,
    linker: Arc<Linker>,
}

impl Services {
    pub fn globals(&self) -> &Map<String, Value> {
        &self.globals
    }

    pub fn linker(&self) -> &Linker {
        &self.linker
    }
}

struct EngineInner {
    environment: EnvironmentHandle,
    modules: Vec<String>,
    services: OnceLock<Services>,
    signal: ReadySignal,
}

/// An isolated template runtime over a fixed, ordered module list.
///
/// Construction is synchronous; the injector is resolved on the current
/// tokio runtime afterwards. Until that finishes every operation fails
/// with [`EngineError::RuntimeNotReady`]; use [`TemplateEngine::ready`] or
/// [`TemplateEngine::on_ready`] to wait for it.
#[derive(Clone)]
pub struct TemplateEngine {
    inner: Arc<EngineInner>,
}

impl TemplateEngine {
    /// Build a runtime from `core` plus `descriptors`, in order.
    ///
    /// Descriptors carrying a manifest path are loaded relative to the
    /// process working directory right away; pathless ones are looked up
    /// when the injector resolves, so `init` may still register them.
    pub fn new<I>(
        environment: &EnvironmentHandle,
        descriptors: I,
        init: impl FnOnce(&TemplateEngine),
    ) -> Result<Self, EngineError>
    where
        I: IntoIterator<Item = ModuleDescriptor>,
    {
        if !environment.is_ready() {
            return Err(EngineError::EnvironmentNotReady);
        }
        let executor = Handle::try_current().map_err(|_| EngineError::NoExecutor)?;

        let base_dir = std::env::current_dir().map_err(|source| ModuleError::Io {
            path: PathBuf::from("."),
            source,
        })?;

        let mut modules = vec![CORE_MODULE.to_string()];
        for descriptor in descriptors {
            if descriptor.path.is_some() {
                environment
                    .registry()
                    .load_descriptor(&descriptor, &base_dir)?;
            }
            modules.push(descriptor.name);
        }

        let engine = Self {
            inner: Arc::new(EngineInner {
                environment: environment.clone(),
                modules,
                services: OnceLock::new(),
                signal: ReadySignal::new(),
            }),
        };

        init(&engine);

        let inner = Arc::clone(&engine.inner);
        executor.spawn(async move {
            tokio::task::yield_now().await;
            inner.resolve_injector();
        });

        Ok(engine)
    }

    pub fn environment(&self) -> &EnvironmentHandle {
        &self.inner.environment
    }

    /// Loaded module identifiers, `core` first.
    pub fn modules(&self) -> &[String] {
        &self.inner.modules
    }

    pub fn is_ready(&self) -> bool {
        self.inner.signal.is_ready()
    }

    pub fn on_ready(&self, callback: impl FnOnce() + Send + 'static) {
        self.inner.signal.when_ready(callback);
    }

    pub async fn ready(&self) {
        self.inner.signal.wait().await;
    }

    pub fn services(&self) -> Result<&Services, EngineError> {
        self.inner.services.get().ok_or(EngineError::RuntimeNotReady)
    }

    /// A scope detached from any compiled template; the caller owns it.
    pub fn new_scope(&self) -> Result<Scope, EngineError> {
        let services = self.services()?;
        Ok(Scope::new(Arc::clone(&services.globals)))
    }

    pub fn interpolate(&self, markup: &str) -> Result<Interpolator, EngineError> {
        let services = self.services()?;
        Ok(Interpolator {
            interpolation: Interpolation::parse(markup)?,
            globals: Arc::clone(&services.globals),
            filters: services.linker.filters().clone(),
        })
    }

    /// Compile `source` against a fresh scope. `init` seeds the scope's
    /// root layer before any binding happens.
    pub fn compile(
        &self,
        source: impl Into<TemplateSource>,
        init: impl FnOnce(&mut RootScope),
    ) -> Result<CompiledTemplate, EngineError> {
        let services = self.services()?;
        let mut scope = Scope::new(Arc::clone(&services.globals));
        init(scope.root_mut());
        Ok(CompiledTemplate::new(
            source.into().into_markup(),
            scope,
            Arc::clone(&services.linker),
        ))
    }
}

impl EngineInner {
    fn resolve_injector(&self) {
        let registry = self.environment.registry();
        let mut directives = Vec::new();
        let mut filters = Filters::default();
        let mut globals = Map::new();

        for name in &self.modules {
            let Some(module) = registry.get(name) else {
                error!(
                    target = "vellum::render::runtime",
                    module = %name,
                    "injector failed: module is not registered"
                );
                return;
            };
            directives.extend(module.directives().iter().cloned());
            filters.extend(module.filters());
            globals.extend(
                module
                    .constants()
                    .iter()
                    .map(|(key, value)| (key.clone(), value.clone())),
            );
        }

        let services = Services {
            globals: Arc::new(globals),
            linker: Arc::new(Linker::new(directives, filters)),
        };
        let directive_count = services.linker.directive_names().count();
        if self.services.set(services).is_err() {
            return;
        }

        info!(
            target = "vellum::render::runtime",
            modules = ?self.modules,
            directives = directive_count,
            "template runtime ready"
        );
        self.signal.fire();
    }
}

/// A parsed `{{ … }}` template with no scope of its own.
pub struct Interpolator {
    interpolation: Interpolation,
    globals: Arc<Map<String, Value>>,
    filters: Filters,
}

impl Interpolator {
    pub fn render(&self, context: &Value) -> Result<String, BindingError> {
        let view = ContextView {
            context,
            globals: &self.globals,
        };
        self.interpolation.render(&view, &self.filters)
    }
}

struct ContextView<'a> {
    context: &'a Value,
    globals: &'a Map<String, Value>,
}

impl Resolve for ContextView<'_> {
    fn resolve(&self, key: &str) -> Option<&Value> {
        self.context.resolve(key).or_else(|| self.globals.get(key))
    }
}

use std::{
    cell::Cell,
    sync::{Arc, OnceLock, RwLock},
};

use lol_html::{RewriteStrSettings, element, rewrite_str};
use tokio::{runtime::Handle, task::JoinHandle};
use tracing::{debug, error, info};

use super::{
    directive::core_module, error::EngineError, module::ModuleRegistry, signal::ReadySignal,
};
use crate::util::lock::{rw_read, rw_write};

/// Markup the environment boots from when no seed is configured.
pub const DEFAULT_SEED: &str = "<!doctype html><html><head></head><body></body></html>";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvironmentState {
    Uninitialized,
    Booting,
    Ready,
}

/// Element census of the seed document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    elements: usize,
    has_head: bool,
    has_body: bool,
}

impl Document {
    fn parse(seed: &str) -> Result<Self, String> {
        let elements = Cell::new(0usize);
        let has_head = Cell::new(false);
        let has_body = Cell::new(false);

        rewrite_str(
            seed,
            RewriteStrSettings {
                element_content_handlers: vec![element!("*", |el| {
                    elements.set(elements.get() + 1);
                    match el.tag_name().as_str() {
                        "head" => has_head.set(true),
                        "body" => has_body.set(true),
                        _ => {}
                    }
                    Ok(())
                })],
                ..RewriteStrSettings::default()
            },
        )
        .map_err(|err| err.to_string())?;

        if elements.get() == 0 {
            return Err("seed markup contains no elements".to_string());
        }

        Ok(Self {
            elements: elements.get(),
            has_head: has_head.get(),
            has_body: has_body.get(),
        })
    }

    pub fn elements(&self) -> usize {
        self.elements
    }

    pub fn has_head(&self) -> bool {
        self.has_head
    }

    pub fn has_body(&self) -> bool {
        self.has_body
    }
}

struct EnvironmentInner {
    state: RwLock<EnvironmentState>,
    signal: ReadySignal,
    registry: ModuleRegistry,
    document: OnceLock<Document>,
}

/// Process-wide template environment.
///
/// Constructed once by the process and passed to every
/// [`TemplateEngine`](super::runtime::TemplateEngine). It boots exactly once
/// and owns the module namespace shared by all runtimes.
#[derive(Clone)]
pub struct EnvironmentHandle {
    inner: Arc<EnvironmentInner>,
}

impl EnvironmentHandle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(EnvironmentInner {
                state: RwLock::new(EnvironmentState::Uninitialized),
                signal: ReadySignal::new(),
                registry: ModuleRegistry::new(),
                document: OnceLock::new(),
            }),
        }
    }

    pub fn state(&self) -> EnvironmentState {
        *rw_read(&self.inner.state, "render::environment", "state")
    }

    pub fn is_ready(&self) -> bool {
        self.inner.signal.is_ready()
    }

    /// Run `callback` once the environment is ready, or now if it already is.
    pub fn when_ready(&self, callback: impl FnOnce() + Send + 'static) {
        self.inner.signal.when_ready(callback);
    }

    pub async fn ready(&self) {
        self.inner.signal.wait().await;
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.inner.registry
    }

    pub fn document(&self) -> Option<&Document> {
        self.inner.document.get()
    }

    /// Spawn the bootstrap on the current tokio runtime.
    pub fn start(&self, seed: impl Into<String>) -> Result<JoinHandle<()>, EngineError> {
        let handle = Handle::try_current().map_err(|_| EngineError::NoExecutor)?;
        let environment = self.clone();
        let seed = seed.into();
        Ok(handle.spawn(async move {
            // failures are logged inside boot
            let _ = environment.boot(&seed).await;
        }))
    }

    /// Boot in the caller's task. A second call is a no-op.
    pub async fn boot(&self, seed: &str) -> Result<(), EngineError> {
        {
            let mut state = rw_write(&self.inner.state, "render::environment", "boot");
            if *state != EnvironmentState::Uninitialized {
                debug!(
                    target = "vellum::render::environment",
                    state = ?*state,
                    "bootstrap already started"
                );
                return Ok(());
            }
            *state = EnvironmentState::Booting;
        }

        tokio::task::yield_now().await;

        let document = match Document::parse(seed) {
            Ok(document) => document,
            Err(message) => {
                error!(
                    target = "vellum::render::environment",
                    error = %message,
                    "environment bootstrap failed"
                );
                return Err(EngineError::Bootstrap(message));
            }
        };

        if !self.inner.registry.contains(super::module::CORE_MODULE) {
            match core_module() {
                Ok(core) => {
                    self.inner.registry.register(core);
                }
                Err(err) => {
                    error!(
                        target = "vellum::render::environment",
                        error = %err,
                        "base module failed to load"
                    );
                    return Err(err.into());
                }
            }
        }

        info!(
            target = "vellum::render::environment",
            elements = document.elements(),
            "template environment ready"
        );
        let _ = self.inner.document.set(document);
        *rw_write(&self.inner.state, "render::environment", "boot") = EnvironmentState::Ready;
        self.inner.signal.fire();
        Ok(())
    }
}

impl Default for EnvironmentHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[tokio::test]
    async fn boot_fires_waiters_once_and_registers_core() {
        let environment = EnvironmentHandle::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for idx in 0..2 {
            let seen = Arc::clone(&seen);
            environment.when_ready(move || seen.lock().unwrap().push(idx));
        }
        assert_eq!(environment.state(), EnvironmentState::Uninitialized);

        environment.boot(DEFAULT_SEED).await.expect("boots");
        environment.boot(DEFAULT_SEED).await.expect("second boot is a no-op");

        let late = Arc::clone(&seen);
        environment.when_ready(move || late.lock().unwrap().push(2));

        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(environment.state(), EnvironmentState::Ready);
        assert!(environment.registry().contains("core"));
        let document = environment.document().expect("document");
        assert!(document.has_head() && document.has_body());
    }

    #[tokio::test]
    async fn empty_seed_never_becomes_ready() {
        let environment = EnvironmentHandle::new();
        let err = environment.boot("just text").await.unwrap_err();

        assert!(matches!(err, EngineError::Bootstrap(_)));
        assert_eq!(environment.state(), EnvironmentState::Booting);
        assert!(!environment.is_ready());
    }

    #[tokio::test]
    async fn start_spawns_the_bootstrap() {
        let environment = EnvironmentHandle::new();
        environment
            .start(DEFAULT_SEED)
            .expect("executor available")
            .await
            .expect("bootstrap task");
        environment.ready().await;
        assert!(environment.is_ready());
    }

    #[test]
    fn start_without_runtime_reports_no_executor() {
        let environment = EnvironmentHandle::new();
        assert!(matches!(
            environment.start(DEFAULT_SEED),
            Err(EngineError::NoExecutor)
        ));
    }
}

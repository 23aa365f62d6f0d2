use std::{cell::RefCell, sync::Arc};

use metrics::counter;
use serde_json::Value;
use tracing::{debug, trace};

use super::{
    binding::Linker,
    error::BindingError,
    scope::{CallQueue, Scope},
};

pub(crate) const METRIC_BINDING_PASSES: &str = "vellum_render_binding_passes_total";
pub(crate) const METRIC_DRAINED_CALLS: &str = "vellum_render_drained_calls_total";

/// Markup handed to [`TemplateEngine::compile`](super::runtime::TemplateEngine::compile).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSource {
    Markup(String),
    /// Outer markup of parsed elements; only the first one is compiled.
    Elements(Vec<String>),
}

impl TemplateSource {
    pub(crate) fn into_markup(self) -> String {
        match self {
            Self::Markup(markup) => markup,
            Self::Elements(elements) => elements.into_iter().next().unwrap_or_default(),
        }
    }
}

impl From<&str> for TemplateSource {
    fn from(markup: &str) -> Self {
        Self::Markup(markup.to_string())
    }
}

impl From<String> for TemplateSource {
    fn from(markup: String) -> Self {
        Self::Markup(markup)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    pub passes: usize,
    pub drained_calls: usize,
}

/// A template bound to a fresh scope, ready for exactly one invocation.
pub struct CompiledTemplate {
    markup: String,
    scope: Scope,
    linker: Arc<Linker>,
}

impl CompiledTemplate {
    pub(crate) fn new(markup: String, scope: Scope, linker: Arc<Linker>) -> Self {
        Self {
            markup,
            scope,
            linker,
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub async fn invoke(self, context: Value) -> Result<String, BindingError> {
        self.invoke_with_stats(context).await.map(|(html, _)| html)
    }

    /// Bind, drain every queued call in order, and rebind until a pass
    /// queues nothing. Consumes the template; the scope is destroyed on
    /// success and dropped untouched on failure.
    pub async fn invoke_with_stats(
        self,
        context: Value,
    ) -> Result<(String, DrainStats), BindingError> {
        let Self {
            markup,
            mut scope,
            linker,
        } = self;
        scope.merge(context)?;

        let queue = RefCell::new(CallQueue::new());
        let mut stats = DrainStats::default();
        let mut html = pass(&linker, &markup, &scope, &queue, &mut stats)?;

        loop {
            let generation = queue.borrow_mut().take();
            if generation.is_empty() {
                break;
            }

            debug!(
                target = "vellum::render::compiled",
                scope = scope.id(),
                pass = stats.passes,
                calls = generation.len(),
                "draining deferred calls"
            );
            for call in generation {
                let (name, target, task) = call.into_parts();
                let outcome = task.await?;
                stats.drained_calls += 1;
                counter!(METRIC_DRAINED_CALLS).increment(1);
                trace!(
                    target = "vellum::render::compiled",
                    call = %name,
                    key = target.as_deref().unwrap_or("-"),
                    "deferred call resolved"
                );
                if let Some(target) = target {
                    scope.store_result(target, outcome.unwrap_or(Value::Null));
                }
            }

            html = pass(&linker, &markup, &scope, &queue, &mut stats)?;
        }

        scope.destroy();
        Ok((html, stats))
    }
}

fn pass(
    linker: &Linker,
    markup: &str,
    scope: &Scope,
    queue: &RefCell<CallQueue>,
    stats: &mut DrainStats,
) -> Result<String, BindingError> {
    stats.passes += 1;
    counter!(METRIC_BINDING_PASSES).increment(1);
    linker.bind(markup, scope, queue)
}

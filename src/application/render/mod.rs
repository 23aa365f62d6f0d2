//! Template engine: a process-wide environment, isolated runtimes over an
//! ordered module list, and compiled templates that bind markup, drain the
//! deferred calls a pass discovers, and rebind until nothing is left.

mod binding;
mod compiled;
mod directive;
mod environment;
mod error;
mod expr;
mod module;
mod runtime;
mod scope;
mod signal;

pub(crate) use compiled::{METRIC_BINDING_PASSES, METRIC_DRAINED_CALLS};

pub use binding::{LinkContext, Linker, MAX_BIND_DEPTH};
pub use compiled::{CompiledTemplate, DrainStats, TemplateSource};
pub use directive::{ComponentDirective, Directive, core_module, required_attribute};
pub use environment::{DEFAULT_SEED, Document, EnvironmentHandle, EnvironmentState};
pub use error::{BindingError, EngineError, ModuleError};
pub use expr::{
    Expression, FilterFn, Filters, Interpolation, Part, Resolve, base_filters, display, filter,
    has_markers, is_truthy,
};
pub use module::{CORE_MODULE, Module, ModuleDescriptor, ModuleRegistry};
pub use runtime::{Interpolator, Services, TemplateEngine};
pub use scope::{CallFuture, CallQueue, Layer, PendingCall, RootScope, Scope, ScopeView};
pub use signal::ReadySignal;

use std::path::PathBuf;

use thiserror::Error;

/// Failures raised by the template engine. Readiness errors are ordering
/// bugs in the caller and are never retried.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("template environment not yet ready")]
    EnvironmentNotReady,
    #[error("template runtime not yet ready")]
    RuntimeNotReady,
    #[error("no async executor available to resolve the module injector")]
    NoExecutor,
    #[error("environment bootstrap failed: {0}")]
    Bootstrap(String),
    #[error(transparent)]
    Module(#[from] ModuleError),
    #[error(transparent)]
    Binding(#[from] BindingError),
}

#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("failed to read module manifest `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid module manifest `{path}`: {message}")]
    Manifest { path: PathBuf, message: String },
    #[error("module descriptor `{expected}` loaded a module named `{found}`")]
    NameMismatch { expected: String, found: String },
    #[error("module `{name}` is not registered")]
    Unknown { name: String },
    #[error("directive `{directive}` has an invalid selector `{selector}`: {message}")]
    InvalidSelector {
        directive: String,
        selector: String,
        message: String,
    },
}

impl ModuleError {
    pub fn unknown(name: impl Into<String>) -> Self {
        Self::Unknown { name: name.into() }
    }
}

/// Errors raised while binding markup or draining deferred calls. A render
/// that hits one of these is abandoned.
#[derive(Debug, Clone, Error)]
pub enum BindingError {
    #[error("invalid expression `{expression}`: {message}")]
    Expression { expression: String, message: String },
    #[error("unknown filter `{0}`")]
    UnknownFilter(String),
    #[error("filter `{filter}` failed: {message}")]
    Filter { filter: String, message: String },
    #[error("directive `{directive}` failed: {message}")]
    Directive { directive: String, message: String },
    #[error("deferred call `{name}` failed: {message}")]
    Call { name: String, message: String },
    #[error("invocation context must be an object, got {0}")]
    Context(&'static str),
    #[error("markup processing failed: {0}")]
    Markup(String),
    #[error("nested binding exceeded {0} levels")]
    DepthExceeded(usize),
}

impl BindingError {
    pub fn directive(directive: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Directive {
            directive: directive.into(),
            message: message.into(),
        }
    }

    pub fn call(name: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Call {
            name: name.into(),
            message: message.to_string(),
        }
    }

    pub(crate) fn expression(expression: &str, message: impl Into<String>) -> Self {
        Self::Expression {
            expression: expression.to_string(),
            message: message.into(),
        }
    }
}

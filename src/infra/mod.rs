//! Infrastructure adapters and runtime bootstrap.

pub mod bootstrap;
pub mod content;
pub mod error;
pub mod http;
pub mod site;
pub mod telemetry;

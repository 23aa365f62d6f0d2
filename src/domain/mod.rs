//! Domain layer types and invariants.

pub mod content;
pub mod error;
pub mod site;
pub mod types;

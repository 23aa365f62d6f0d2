//! Application services: the template engine, page rendering and the
//! collaborators it reads content through.

pub mod error;
pub mod page;
pub mod render;
pub mod repos;
pub mod server_fn;
pub mod types;

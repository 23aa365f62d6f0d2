//! Vellum: a CMS page renderer.
//!
//! Pages live as container directories under a site base. Each is rendered
//! by compiling its page template against the page content through a
//! template engine whose directives may defer asynchronous server calls.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
pub mod presentation;
pub(crate) mod util;

use crate::application::error::{ErrorReport, HttpError};
use askama::{Error as AskamaError, Template};
use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("{public_message}")]
pub struct TemplateRenderError {
    pub(crate) source: &'static str,
    pub(crate) public_message: &'static str,
    #[source]
    pub(crate) error: AskamaError,
}

impl TemplateRenderError {
    pub fn new(source: &'static str, public_message: &'static str, error: AskamaError) -> Self {
        Self {
            source,
            public_message,
            error,
        }
    }
}

impl From<TemplateRenderError> for HttpError {
    fn from(err: TemplateRenderError) -> Self {
        let TemplateRenderError {
            source,
            public_message,
            error,
        } = err;

        HttpError::from_error(
            source,
            StatusCode::INTERNAL_SERVER_ERROR,
            public_message,
            &error,
        )
    }
}

/// Render a snippet spliced into a page document.
pub fn render_fragment<T: Template>(template: T) -> Result<String, TemplateRenderError> {
    template.render().map_err(|err| {
        TemplateRenderError::new(
            "presentation::views::render_fragment",
            "Page fragment rendering failed",
            err,
        )
    })
}

pub fn render_template<T: Template>(template: T) -> Result<Html<String>, HttpError> {
    template.render().map(Html).map_err(|err| {
        TemplateRenderError::new(
            "presentation::views::render_template",
            "Template rendering failed",
            err,
        )
        .into()
    })
}

pub fn render_template_response<T: Template>(template: T, status: StatusCode) -> Response {
    match render_template(template) {
        Ok(html) => (status, html).into_response(),
        Err(err) => err.into_response(),
    }
}

/// Error page carrying `report` for the response logger.
pub fn render_error_response(
    status: StatusCode,
    title: &'static str,
    message: &'static str,
    report: ErrorReport,
) -> Response {
    let mut response = render_template_response(
        ErrorTemplate {
            status: status.as_u16(),
            title,
            message,
        },
        status,
    );
    report.attach(&mut response);
    response
}

#[derive(Template)]
#[template(path = "error.html")]
pub struct ErrorTemplate {
    pub status: u16,
    pub title: &'static str,
    pub message: &'static str,
}

/// Runtime scripts and stylesheet for the authoring UI.
#[derive(Template)]
#[template(path = "page/admin_head.html")]
pub struct AdminHeadTemplate<'a> {
    pub asset_base: &'a str,
}

#[derive(Template)]
#[template(path = "page/public_styles.html")]
pub struct PublicStylesTemplate<'a> {
    pub asset_base: &'a str,
}

#[derive(Template)]
#[template(path = "page/base_href.html")]
pub struct BaseHrefTemplate<'a> {
    pub href: &'a str,
}

/// JSON payload for the client runtime. `json` must already be safe to
/// embed in a script element.
#[derive(Template)]
#[template(path = "page/data_island.html")]
pub struct DataIslandTemplate {
    pub json: String,
}

use std::{
    path::{Path as FsPath, PathBuf},
    sync::Arc,
};

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, State},
    http::{
        HeaderValue, Method, StatusCode, Uri,
        header::{CONTENT_LENGTH, CONTENT_TYPE},
    },
    middleware,
    response::{Html, IntoResponse, Response},
    routing::get,
};
use tracing::warn;

use crate::{
    application::{
        error::{AppError, ErrorReport},
        page::{PageRenderer, RenderError},
    },
    infra::site::PAGE_FILE,
    presentation::views::render_error_response,
};

use super::middleware::{log_responses, set_request_context};

const INDEX_FILE: &str = "index.html";

#[derive(Clone)]
pub struct HttpState {
    pub renderer: Arc<PageRenderer>,
    /// Secured sites never serve the authoring UI.
    pub security: bool,
    pub base_url_path: String,
    /// Site directory; files under it are served as they are.
    pub site_root: PathBuf,
    /// Authoring UI bundle served under `/build`.
    pub bundle_dir: Option<PathBuf>,
}

impl HttpState {
    fn admin_mode(&self) -> bool {
        !self.security
    }
}

pub fn build_router(state: HttpState) -> Router {
    let mut router = Router::new().route("/cms-site-map", get(site_map));
    if state.bundle_dir.is_some() {
        router = router.route("/build/{*path}", get(serve_bundle));
    }

    router
        .fallback(render_page)
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

async fn site_map(State(state): State<HttpState>) -> Response {
    match state.renderer.site().site_tree().await {
        Ok(tree) => Json(tree).into_response(),
        Err(err) => AppError::from(RenderError::from(err)).into_response(),
    }
}

async fn render_page(State(state): State<HttpState>, method: Method, uri: Uri) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    if let Some(relative) = asset_path(&state.base_url_path, uri.path())
        && let Some(response) = serve_file(&state.site_root, &relative).await
    {
        return response;
    }

    let Some(path) = page_path(&state.base_url_path, uri.path()) else {
        return error_page(AppError::NotFound);
    };

    match state.renderer.render_path(&path, state.admin_mode()).await {
        Ok(html) => Html(html).into_response(),
        Err(err) => error_page(AppError::from(err)),
    }
}

async fn serve_bundle(State(state): State<HttpState>, Path(path): Path<String>) -> Response {
    let Some(dir) = state.bundle_dir.as_deref() else {
        return error_page(AppError::NotFound);
    };
    match asset_path("/", &format!("/{path}")) {
        Some(relative) => match serve_file(dir, &relative).await {
            Some(response) => response,
            None => error_page(AppError::NotFound),
        },
        None => error_page(AppError::NotFound),
    }
}

/// The file at `relative` under `root`, or nothing when there is no such
/// regular file.
async fn serve_file(root: &FsPath, relative: &str) -> Option<Response> {
    let path = root.join(relative);
    let metadata = tokio::fs::metadata(&path).await.ok()?;
    if !metadata.is_file() {
        return None;
    }
    match tokio::fs::read(&path).await {
        Ok(bytes) => Some(file_response(relative, bytes)),
        Err(err) => {
            warn!(
                target = "vellum::http::assets",
                path = %path.display(),
                error = %err,
                "failed to read asset"
            );
            None
        }
    }
}

fn file_response(path: &str, bytes: Vec<u8>) -> Response {
    let length = bytes.len();
    let mut response = Response::new(Body::from(bytes));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        headers.insert(CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&length.to_string()) {
        headers.insert(CONTENT_LENGTH, value);
    }

    response
}

fn error_page(err: AppError) -> Response {
    let status = err.status_code();
    let report = ErrorReport::from_error("infra::http::public::render_page", status, &err);
    render_error_response(
        status,
        status.canonical_reason().unwrap_or("Error"),
        err.presentation_message(),
        report,
    )
}

/// Map a request path to the container directory it addresses.
///
/// Strips the site's base URL path and a trailing `index.html` segment;
/// requests outside the base URL path or climbing out of it map to nothing.
pub fn page_path(base_url_path: &str, request_path: &str) -> Option<String> {
    let rest = strip_base(base_url_path, request_path)?;
    let rest = rest
        .strip_suffix(INDEX_FILE)
        .filter(|prefix| prefix.is_empty() || prefix.ends_with('/'))
        .unwrap_or(rest);
    if rest.split('/').any(|segment| segment == "..") {
        return None;
    }
    Some(rest.trim_matches('/').to_string())
}

/// Map a request path to a static file under the site base.
///
/// Page files (`index.json`, `index.html`) and dot-files are never served;
/// `index.html` requests render the page instead.
pub fn asset_path(base_url_path: &str, request_path: &str) -> Option<String> {
    let rest = strip_base(base_url_path, request_path)?.trim_matches('/');
    let segments = rest.split('/').collect::<Vec<_>>();
    let last = segments.last()?;
    if last.is_empty() || *last == PAGE_FILE || *last == INDEX_FILE {
        return None;
    }
    if segments
        .iter()
        .any(|segment| segment.is_empty() || segment.starts_with('.'))
    {
        return None;
    }
    Some(rest.to_string())
}

fn strip_base<'a>(base_url_path: &str, request_path: &'a str) -> Option<&'a str> {
    let base = base_url_path.trim_end_matches('/');
    let rest = request_path.strip_prefix(base)?;
    (rest.is_empty() || rest.starts_with('/')).then_some(rest)
}

mod support;

use std::{path::Path, sync::Arc};

use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header::CONTENT_TYPE},
};
use serde_json::{Map, Value};
use tower::ServiceExt;
use vellum::infra::http::{HttpState, build_router};

use support::{data_island, renderer, site};

async fn router(base: &Path, security: bool) -> Router {
    build_router(HttpState {
        renderer: Arc::new(renderer(base, Map::new()).await),
        security,
        base_url_path: "/".to_string(),
        site_root: base.to_path_buf(),
        bundle_dir: None,
    })
}

async fn get(app: &Router, uri: &str) -> (StatusCode, String, String) {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .expect("request should build");
    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("router should respond");
    let status = response.status();
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let body = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should collect");
    (
        status,
        content_type,
        String::from_utf8(body.to_vec()).expect("utf-8 body"),
    )
}

#[tokio::test]
async fn open_sites_serve_the_authoring_ui() {
    let site = site();
    let app = router(site.path(), false).await;

    let (status, content_type, body) = get(&app, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert!(content_type.starts_with("text/html"));
    assert!(data_island(&body).is_some());

    let (status, _, index) = get(&app, "/index.html").await;
    assert_eq!(status, StatusCode::OK);
    assert!(data_island(&index).is_some());
}

#[tokio::test]
async fn secured_sites_serve_public_pages() {
    let site = site();
    let app = router(site.path(), true).await;

    let (status, _, body) = get(&app, "/about/").await;
    assert_eq!(status, StatusCode::OK);
    assert!(data_island(&body).is_none());
    assert!(body.contains("public.css"));
}

#[tokio::test]
async fn site_map_lists_container_directories() {
    let site = site();
    let app = router(site.path(), true).await;

    let (status, content_type, body) = get(&app, "/cms-site-map").await;
    assert_eq!(status, StatusCode::OK);
    assert!(content_type.starts_with("application/json"));

    let map: Value = serde_json::from_str(&body).expect("JSON site map");
    assert_eq!(map["baseUrlPath"], "/");
    assert_eq!(map["templates"], serde_json::json!(["landing"]));
    assert_eq!(map["tree"]["type"], "containerDirectory");
    assert_eq!(map["tree"]["pageTemplate"], "index.html");
    let children = map["tree"]["children"].as_array().expect("children");
    assert!(children.iter().any(|child| child["path"] == "about"
        && child["type"] == "containerDirectory"
        && child["pageTemplate"] == "index.html"));
}

#[tokio::test]
async fn unknown_pages_render_the_error_page() {
    let site = site();
    let app = router(site.path(), true).await;

    let (status, content_type, body) = get(&app, "/nowhere").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(content_type.starts_with("text/html"));
    assert!(body.contains("Page not found"));
}

#[tokio::test]
async fn non_get_requests_are_rejected() {
    let site = site();
    let app = router(site.path(), true).await;

    let request = Request::builder()
        .method(Method::POST)
        .uri("/")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn site_files_and_the_bundle_are_served_as_they_are() {
    let site = site();
    support::write(site.path(), "img/logo.svg", "<svg></svg>");
    support::write(site.path(), "css/site.css", "body{}");
    let bundle = tempfile::tempdir().expect("tempdir");
    support::write(bundle.path(), "lib.bundle.js", "console.log(1)");

    let app = build_router(HttpState {
        renderer: Arc::new(renderer(site.path(), Map::new()).await),
        security: true,
        base_url_path: "/".to_string(),
        site_root: site.path().to_path_buf(),
        bundle_dir: Some(bundle.path().to_path_buf()),
    });

    let (status, content_type, body) = get(&app, "/img/logo.svg").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type, "image/svg+xml");
    assert_eq!(body, "<svg></svg>");

    let (status, content_type, _) = get(&app, "/css/site.css").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type, "text/css");

    let (status, content_type, body) = get(&app, "/build/lib.bundle.js").await;
    assert_eq!(status, StatusCode::OK);
    assert!(content_type.contains("javascript"));
    assert_eq!(body, "console.log(1)");

    let (status, _, body) = get(&app, "/index.json").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(!body.contains("containers"));

    let (status, _, _) = get(&app, "/.types/Article.json").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, _) = get(&app, "/build/missing.js").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

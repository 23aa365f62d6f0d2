mod support;

use serde_json::{Map, Value, json};
use vellum::{
    application::page::{
        DocumentEditor, DocumentError, PageFilter, RenderError, RenderOptions,
    },
    domain::content::PageContent,
};

use support::{data_island, renderer, site};

struct MarkFilter;

impl PageFilter for MarkFilter {
    fn apply(&self, document: &mut DocumentEditor, content: &mut PageContent) -> Result<(), DocumentError> {
        let containers = content.containers.len().to_string();
        content
            .containers
            .insert("filtered".to_string(), Value::Bool(true));
        document.set_body_attribute("data-containers", &containers)
    }
}

#[tokio::test]
async fn public_render_replaces_body_with_resolved_markup() {
    let site = site();
    let renderer = renderer(site.path(), Map::new()).await;

    let html = renderer.render_path("", false).await.expect("renders");

    assert!(data_island(&html).is_none());
    assert!(!html.contains("cms-data"));
    assert!(!html.contains("lib.bundle.js"));
    assert!(html.contains(r#"<link rel="stylesheet" href="build/public.css"/>"#));
    assert!(html.contains("<title>Demo</title>"));
    assert!(html.contains("<h1>Welcome</h1>"));
    assert!(!html.contains("no intro"));
    assert!(html.contains(
        r#"<main cms-container="main"><article><h2>First</h2></article><article><h2>Second</h2></article></main>"#
    ));
    assert!(html.contains(">2</span>"));
    assert!(html.contains(r#"<body class="page">"#));
}

#[tokio::test]
async fn admin_render_embeds_exactly_one_data_island() {
    let site = site();
    let mut online = Map::new();
    online.insert("title".to_string(), json!("Demo site"));
    let renderer = renderer(site.path(), online).await;

    let html = renderer.render_path("/", true).await.expect("renders");

    assert_eq!(html.matches(r#"id="cms-data""#).count(), 1);
    let island = data_island(&html).expect("valid JSON island");
    let keys: Vec<&str> = island
        .as_object()
        .expect("object")
        .keys()
        .map(String::as_str)
        .collect();
    for key in ["types", "containers", "online", "serverFn", "setupServerFn"] {
        assert!(keys.contains(&key), "missing island key {key}");
    }
    assert_eq!(island["types"]["Article"]["list"].as_array().map(Vec::len), Some(2));
    assert_eq!(island["types"]["Article"]["serverFn"], json!(["count"]));
    assert_eq!(island["online"]["title"], json!("Demo site"));
    assert_eq!(island["serverFn"], json!(["count"]));
    assert!(island["setupServerFn"]["count"].is_object());
    assert_eq!(island["containers"]["note"], json!("</script><b>unsafe</b>"));

    assert!(html.contains(r#"<script src="build/lib.bundle.js"></script>"#));
    assert!(html.contains(r#"cms-controller="appCtrl""#));
    assert!(!html.contains("build/public.css"));
    assert!(html.contains("<h1>Welcome</h1>"));
}

#[tokio::test]
async fn disabled_inject_lib_keeps_only_the_island() {
    let site = site();
    let renderer = renderer(site.path(), Map::new()).await;
    let mut content = PageContent {
        path: Some("index.html".to_string()),
        disable_inject_lib: true,
        ..PageContent::default()
    };

    let html = renderer
        .render(&mut content, &RenderOptions::page("", true))
        .await
        .unwrap();

    assert!(data_island(&html).is_some());
    assert!(!html.contains("lib.bundle.js"));
    assert!(!html.contains("cms-controller"));
}

#[tokio::test]
async fn public_renders_skip_filters() {
    let site = site();
    let renderer = renderer(site.path(), Map::new()).await.with_filter(MarkFilter);

    let admin = renderer.render_path("", true).await.unwrap();
    assert!(admin.contains(r#"data-containers="3""#));

    let public = renderer.render_path("", false).await.unwrap();
    assert!(!public.contains("data-containers"));
}

#[tokio::test]
async fn resolve_only_renders_run_filters_without_admin_injection() {
    let site = site();
    let renderer = renderer(site.path(), Map::new())
        .await
        .with_filter(MarkFilter);

    for options in [RenderOptions::for_template(), RenderOptions::for_create_page()] {
        let mut content = PageContent::from_json(
            &json!({
                "path": "index.html",
                "containers": {"intro": "<h1>Template</h1>"}
            })
            .to_string(),
        )
        .unwrap();

        let html = renderer.render(&mut content, &options).await.unwrap();
        assert!(html.contains("<h1>Template</h1>"));
        assert!(data_island(&html).is_none());
        assert!(!html.contains("lib.bundle.js"));
        assert!(!html.contains("public.css"));
        assert!(html.contains(r#"data-containers="1""#));
        assert_eq!(content.containers.get("filtered"), Some(&Value::Bool(true)));
    }
}

#[tokio::test]
async fn container_fallback_children_are_not_linked_when_content_exists() {
    let site = site();
    support::write(
        site.path(),
        "fallback/index.html",
        r#"<html><head></head><body><header cms-container="intro"><span cms-fn="missing"></span></header></body></html>"#,
    );
    support::write(
        site.path(),
        "fallback/index.json",
        r#"{"containers": {"intro": "<h1>Hi</h1>"}}"#,
    );
    let renderer = renderer(site.path(), Map::new()).await;

    let html = renderer
        .render_path("fallback", false)
        .await
        .expect("the unknown function in the fallback is never called");
    assert!(html.contains(r#"<header cms-container="intro"><h1>Hi</h1></header>"#));
    assert!(!html.contains("cms-fn"));
}

#[tokio::test]
async fn online_base_becomes_base_href() {
    let site = site();
    let mut online = Map::new();
    online.insert("base".to_string(), Value::String("/docs/".to_string()));
    let renderer = renderer(site.path(), online).await;

    let html = renderer.render_path("about", false).await.unwrap();
    assert!(html.contains(r#"<base href="/docs/">"#));
}

#[tokio::test]
async fn pages_without_containers_render_template_defaults() {
    let site = site();
    let renderer = renderer(site.path(), Map::new()).await;

    let html = renderer.render_path("about", false).await.unwrap();
    assert!(html.contains("<p>no intro</p>"));
    assert!(html.contains(r#"<main cms-container="main"></main>"#));
}

#[tokio::test]
async fn missing_templates_and_pages_are_reported() {
    let site = site();
    let renderer = renderer(site.path(), Map::new()).await;

    let mut content = PageContent {
        path: Some("missing.html".to_string()),
        ..PageContent::default()
    };
    assert!(matches!(
        renderer
            .render(&mut content, &RenderOptions::page("", false))
            .await,
        Err(RenderError::TemplateNotFound(path)) if path == "missing.html"
    ));

    let mut orphan = PageContent::default();
    assert!(matches!(
        renderer
            .render(&mut orphan, &RenderOptions::page("nowhere", false))
            .await,
        Err(RenderError::TemplateNotFound(_))
    ));

    assert!(matches!(
        renderer.render_path("nowhere", false).await,
        Err(RenderError::PageNotFound(_))
    ));
}

#[tokio::test]
async fn content_store_changes_show_up_on_the_next_render() {
    let site = site();
    let renderer = renderer(site.path(), Map::new()).await;
    assert!(renderer.render_path("", false).await.unwrap().contains(">2</span>"));

    support::write(
        site.path(),
        ".types/Article.json",
        &json!({
            "name": "Article",
            "info": {"isViewElement": true},
            "template": "<article>{{ model.title }}</article>",
            "list": [{"id": "a1", "title": "Only"}]
        })
        .to_string(),
    );

    let html = renderer.render_path("", false).await.unwrap();
    assert!(html.contains(">1</span>"));
    assert!(html.contains("<article>Only</article>"));
}

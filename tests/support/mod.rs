#![allow(dead_code)]

use std::{fs, path::Path, sync::Arc};

use serde_json::{Map, Value, json};
use tempfile::TempDir;
use vellum::{
    application::{
        page::{PageRenderer, PageSettings, page_engine},
        render::{DEFAULT_SEED, EnvironmentHandle},
        repos::ContentStore,
        server_fn::ServerFunctions,
    },
    infra::{content::JsonContentStore, site::FsSiteRepo},
};

pub const INDEX_TEMPLATE: &str = r#"<!DOCTYPE html><html><head><title>Demo</title></head><body class="page"><header cms-container="intro"><p>no intro</p></header><main cms-container="main"></main><footer>Articles: <span cms-fn="count" cms-args='["Article"]'></span></footer></body></html>"#;

pub fn write(base: &Path, path: &str, contents: &str) {
    let path = base.join(path);
    fs::create_dir_all(path.parent().expect("parent directory")).expect("create directories");
    fs::write(path, contents).expect("write fixture");
}

/// A site with one root page listing articles, an `about` page without
/// containers and an `Article` type with two elements.
pub fn site() -> TempDir {
    let dir = tempfile::tempdir().expect("tempdir");
    let base = dir.path();

    write(base, "index.html", INDEX_TEMPLATE);
    write(
        base,
        "index.json",
        &json!({
            "containers": {
                "intro": "<h1>Welcome</h1>",
                "main": [
                    {"type": "Article", "ref": "a1"},
                    {"type": "Article", "ref": "gone"},
                    {"type": "Article", "ref": "a2"}
                ],
                "note": "</script><b>unsafe</b>"
            }
        })
        .to_string(),
    );
    write(base, "about/index.json", r#"{"containers": {}}"#);
    write(base, ".template-page/landing.tpl.json", "{}");
    write(
        base,
        ".types/Article.json",
        &json!({
            "name": "Article",
            "info": {"isViewElement": true},
            "template": "<article><h2>{{ model.title }}</h2></article>",
            "serverFn": ["count"],
            "list": [
                {"id": "a1", "title": "First"},
                {"id": "a2", "title": "Second"}
            ]
        })
        .to_string(),
    );
    dir
}

pub async fn renderer(base: &Path, online: Map<String, Value>) -> PageRenderer {
    let environment = EnvironmentHandle::new();
    environment.boot(DEFAULT_SEED).await.expect("environment boots");
    let engine = page_engine(&environment, Vec::new())
        .await
        .expect("page engine");

    let store: Arc<dyn ContentStore> = Arc::new(JsonContentStore::new(base));
    PageRenderer::new(
        engine,
        Arc::new(FsSiteRepo::new(base, "/")),
        Arc::clone(&store),
        ServerFunctions::with_builtins(store),
        PageSettings {
            online,
            ..PageSettings::default()
        },
    )
}

/// Parsed payload of the `cms-data` island, if the document has one.
pub fn data_island(html: &str) -> Option<Value> {
    let open = r#"<script id="cms-data" type="application/json">"#;
    let start = html.find(open)? + open.len();
    let end = start + html[start..].find("</script>")?;
    serde_json::from_str(&html[start..end]).ok()
}

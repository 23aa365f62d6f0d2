use std::{
    collections::HashMap,
    fs,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use lol_html::html_content::{ContentType, Element};
use serde_json::{Value, json};
use vellum::application::render::{
    BindingError, Directive, EngineError, EnvironmentHandle, LinkContext, Module,
    ModuleDescriptor, ModuleError, PendingCall, TemplateEngine, display, required_attribute,
};

/// `data-fetch="key"`: defers a lookup of `key` and renders its answer.
/// String answers that look like markup are bound again.
struct FetchDirective {
    answers: HashMap<String, Value>,
    log: Arc<Mutex<Vec<String>>>,
}

impl Directive for FetchDirective {
    fn name(&self) -> &str {
        "data-fetch"
    }

    fn selector(&self) -> &str {
        "[data-fetch]"
    }

    fn link(&self, element: &mut Element<'_, '_>, ctx: &LinkContext<'_>) -> Result<(), BindingError> {
        let key = required_attribute(element, self.name(), "data-fetch")?;
        match ctx.scope().result(&key) {
            Some(Value::String(markup)) if markup.starts_with('<') => {
                let html = ctx.bind(markup)?;
                ctx.replace_content(element, &html, ContentType::Html);
            }
            Some(value) => ctx.replace_content(element, &display(value), ContentType::Text),
            None => {
                let answer = self.answers.get(&key).cloned();
                let log = Arc::clone(&self.log);
                let call_key = key.clone();
                ctx.defer(
                    PendingCall::new("fetch", vec![Value::String(key.clone())], async move {
                        tokio::task::yield_now().await;
                        log.lock().unwrap().push(call_key.clone());
                        answer
                            .map(Some)
                            .ok_or_else(|| BindingError::call("fetch", format!("no answer for {call_key}")))
                    })
                    .storing_into(key),
                );
            }
        }
        Ok(())
    }
}

async fn booted() -> EnvironmentHandle {
    let environment = EnvironmentHandle::new();
    environment
        .boot(vellum::application::render::DEFAULT_SEED)
        .await
        .expect("environment boots");
    environment
}

async fn engine_with_fetch(
    answers: &[(&str, Value)],
) -> (TemplateEngine, Arc<Mutex<Vec<String>>>) {
    let environment = booted().await;
    let log = Arc::new(Mutex::new(Vec::new()));
    let module = Module::new("fetch")
        .with_directive(FetchDirective {
            answers: answers
                .iter()
                .map(|(key, value)| (key.to_string(), value.clone()))
                .collect(),
            log: Arc::clone(&log),
        })
        .expect("valid selector");
    environment.registry().register(module);

    let engine = TemplateEngine::new(&environment, [ModuleDescriptor::registered("fetch")], |_| {})
        .expect("engine constructs");
    engine.ready().await;
    (engine, log)
}

#[tokio::test]
async fn interpolates_context_without_draining() {
    let (engine, log) = engine_with_fetch(&[]).await;

    let (html, stats) = engine
        .compile("<div>{{x}}</div>", |_| {})
        .expect("compiles")
        .invoke_with_stats(json!({"x": "hi"}))
        .await
        .expect("invokes");

    assert_eq!(html, "<div>hi</div>");
    assert_eq!(stats.passes, 1);
    assert_eq!(stats.drained_calls, 0);
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn independent_calls_take_two_passes_in_document_order() {
    let (engine, log) = engine_with_fetch(&[
        ("a", json!("alpha")),
        ("b", json!(2)),
        ("c", json!(true)),
    ])
    .await;

    let (html, stats) = engine
        .compile(
            r#"<ul><li data-fetch="a"></li><li data-fetch="b"></li><li data-fetch="c"></li></ul>"#,
            |_| {},
        )
        .unwrap()
        .invoke_with_stats(json!({}))
        .await
        .unwrap();

    assert_eq!(stats.passes, 2);
    assert_eq!(stats.drained_calls, 3);
    assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
    assert_eq!(
        html,
        r#"<ul><li data-fetch="a">alpha</li><li data-fetch="b">2</li><li data-fetch="c">true</li></ul>"#
    );
}

#[tokio::test]
async fn calls_discovered_by_results_run_in_a_later_generation() {
    let (engine, log) = engine_with_fetch(&[
        ("outer", json!(r#"<em data-fetch="inner"></em>"#)),
        ("inner", json!("deep")),
        ("side", json!("s")),
    ])
    .await;

    let (html, stats) = engine
        .compile(
            r#"<p data-fetch="outer"></p><p data-fetch="side"></p>"#,
            |_| {},
        )
        .unwrap()
        .invoke_with_stats(json!({}))
        .await
        .unwrap();

    assert_eq!(stats.passes, 3);
    assert_eq!(stats.drained_calls, 3);
    assert_eq!(*log.lock().unwrap(), vec!["outer", "side", "inner"]);
    assert!(html.contains(r#"<em data-fetch="inner">deep</em>"#));
}

#[tokio::test]
async fn repeated_targets_are_drained_once() {
    let (engine, log) = engine_with_fetch(&[("a", json!("x"))]).await;

    let (html, stats) = engine
        .compile(r#"<i data-fetch="a"></i><b data-fetch="a"></b>"#, |_| {})
        .unwrap()
        .invoke_with_stats(json!({}))
        .await
        .unwrap();

    assert_eq!(stats.drained_calls, 1);
    assert_eq!(log.lock().unwrap().len(), 1);
    assert_eq!(html, r#"<i data-fetch="a">x</i><b data-fetch="a">x</b>"#);
}

#[tokio::test]
async fn hidden_subtrees_are_never_linked() {
    let (engine, log) = engine_with_fetch(&[("a", json!("x")), ("b", json!("bee"))]).await;

    let (html, stats) = engine
        .compile(
            r#"<div cms-if="show"><span data-fetch="a"></span><p>{{ a + b }}</p></div><i data-fetch="b"></i>"#,
            |_| {},
        )
        .unwrap()
        .invoke_with_stats(json!({"show": false}))
        .await
        .expect("hidden markup is not evaluated");

    assert_eq!(html, r#"<i data-fetch="b">bee</i>"#);
    assert_eq!(stats.drained_calls, 1);
    assert_eq!(*log.lock().unwrap(), vec!["b"]);
}

#[tokio::test]
async fn replaced_children_are_never_linked() {
    let (engine, log) = engine_with_fetch(&[("a", json!("x"))]).await;

    let (html, stats) = engine
        .compile(
            r#"<p cms-bind="title"><span data-fetch="a"></span>{{ a + b }}</p><em>{{ title }}</em>"#,
            |_| {},
        )
        .unwrap()
        .invoke_with_stats(json!({"title": "Fresh"}))
        .await
        .expect("replaced markup is not evaluated");

    assert_eq!(html, r#"<p cms-bind="title">Fresh</p><em>Fresh</em>"#);
    assert_eq!(stats.passes, 1);
    assert_eq!(stats.drained_calls, 0);
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test]
async fn failed_call_aborts_the_render() {
    let (engine, _) = engine_with_fetch(&[]).await;

    let err = engine
        .compile(r#"<p data-fetch="missing"></p>"#, |_| {})
        .unwrap()
        .invoke(json!({}))
        .await
        .expect_err("call fails");

    assert!(matches!(err, BindingError::Call { .. }));
}

#[tokio::test]
async fn static_templates_are_idempotent() {
    let (engine, _) = engine_with_fetch(&[]).await;
    let template = r#"<section title="{{ page.title }}"><h1>{{ page.title | uppercase }}</h1><p cms-if="page.show">{{ page.body }}</p></section>"#;
    let context = json!({"page": {"title": "Hello", "body": "<b>text</b>", "show": true}});

    let first = engine
        .compile(template, |_| {})
        .unwrap()
        .invoke(context.clone())
        .await
        .unwrap();
    let second = engine
        .compile(template, |_| {})
        .unwrap()
        .invoke(context)
        .await
        .unwrap();

    assert_eq!(first, second);
    assert!(first.contains("<h1>HELLO</h1>"));
    assert!(first.contains("&lt;b&gt;text&lt;/b&gt;"));
}

#[tokio::test]
async fn init_seeds_the_root_scope() {
    let (engine, _) = engine_with_fetch(&[]).await;

    let html = engine
        .compile("<span>{{ greeting }}, {{ name }}</span>", |root| {
            root.insert("greeting", json!("Hello"));
        })
        .unwrap()
        .invoke(json!({"name": "reader"}))
        .await
        .unwrap();

    assert_eq!(html, "<span>Hello, reader</span>");
}

#[tokio::test]
async fn unbooted_environment_rejects_runtimes() {
    let environment = EnvironmentHandle::new();
    let result = TemplateEngine::new(&environment, Vec::new(), |_| {});
    assert!(matches!(result, Err(EngineError::EnvironmentNotReady)));
}

#[tokio::test]
async fn runtime_operations_fail_before_ready() {
    let environment = booted().await;
    let engine = TemplateEngine::new(
        &environment,
        [ModuleDescriptor::registered("never-registered")],
        |_| {},
    )
    .expect("construction does not resolve pathless modules");

    tokio::task::yield_now().await;
    tokio::task::yield_now().await;

    assert!(!engine.is_ready());
    assert!(matches!(
        engine.compile("<p>{{x}}</p>", |_| {}),
        Err(EngineError::RuntimeNotReady)
    ));
    assert!(matches!(
        engine.interpolate("{{x}}"),
        Err(EngineError::RuntimeNotReady)
    ));
    assert!(matches!(engine.new_scope(), Err(EngineError::RuntimeNotReady)));
}

#[tokio::test]
async fn init_runs_before_ready_callbacks() {
    let environment = booted().await;
    let order = Arc::new(Mutex::new(Vec::new()));

    let init_order = Arc::clone(&order);
    let engine = TemplateEngine::new(&environment, Vec::new(), move |engine| {
        init_order.lock().unwrap().push("init");
        let ready_order = Arc::clone(&init_order);
        engine.on_ready(move || ready_order.lock().unwrap().push("ready"));
    })
    .unwrap();
    assert_eq!(*order.lock().unwrap(), vec!["init"]);

    engine.ready().await;
    let late = Arc::new(AtomicUsize::new(0));
    let late_count = Arc::clone(&late);
    engine.on_ready(move || {
        late_count.fetch_add(1, Ordering::SeqCst);
    });

    assert_eq!(*order.lock().unwrap(), vec!["init", "ready"]);
    assert_eq!(late.load(Ordering::SeqCst), 1);
    assert_eq!(engine.modules(), ["core"]);
}

#[tokio::test]
async fn interpolator_renders_context_and_constants() {
    let environment = booted().await;
    environment
        .registry()
        .register(Module::new("brand").with_constant("brand", json!("Vellum")));
    let engine = TemplateEngine::new(&environment, [ModuleDescriptor::registered("brand")], |_| {})
        .unwrap();
    engine.ready().await;

    let interpolator = engine.interpolate("{{ brand }}: {{ title }}").unwrap();
    assert_eq!(
        interpolator.render(&json!({"title": "Docs"})).unwrap(),
        "Vellum: Docs"
    );
}

#[tokio::test]
async fn manifest_modules_contribute_components() {
    let dir = tempfile::tempdir().expect("tempdir");
    let manifest = dir.path().join("cards.toml");
    fs::write(
        &manifest,
        r#"
name = "cards"

[constants]
site_name = "Demo"

[components]
x-card = "<h3>{{ attrs.title }}</h3><small>{{ site_name }}</small>"
"#,
    )
    .unwrap();

    let environment = booted().await;
    let engine = TemplateEngine::new(
        &environment,
        [ModuleDescriptor::manifest("cards", &manifest)],
        |_| {},
    )
    .unwrap();
    engine.ready().await;
    assert_eq!(engine.modules(), ["core", "cards"]);

    let html = engine
        .compile(r#"<x-card title="First"></x-card>"#, |_| {})
        .unwrap()
        .invoke(json!({}))
        .await
        .unwrap();
    assert_eq!(
        html,
        r#"<x-card title="First"><h3>First</h3><small>Demo</small></x-card>"#
    );
}

#[tokio::test]
async fn manifest_name_must_match_descriptor() {
    let dir = tempfile::tempdir().expect("tempdir");
    let manifest = dir.path().join("cards.toml");
    fs::write(&manifest, "name = \"other\"\n").unwrap();

    let environment = booted().await;
    let result = TemplateEngine::new(
        &environment,
        [ModuleDescriptor::manifest("cards", &manifest)],
        |_| {},
    );
    assert!(matches!(
        result,
        Err(EngineError::Module(ModuleError::NameMismatch { .. }))
    ));
}

//! Page rendering: resolve a page's template, compile its body against the
//! page content, and assemble the final document for visitors or for the
//! authoring UI.

mod directives;
mod document;

use std::{sync::Arc, time::Instant};

use metrics::{counter, histogram};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
    application::{
        render::{
            BindingError, EngineError, EnvironmentHandle, ModuleDescriptor, ModuleError,
            TemplateEngine,
        },
        repos::{ContentStore, SiteRepo, StoreError},
        server_fn::ServerFunctions,
        types::TypesBuilder,
    },
    domain::{content::PageContent, types::TypeMetadata},
    presentation::views::{
        AdminHeadTemplate, BaseHrefTemplate, DataIslandTemplate, PublicStylesTemplate,
        TemplateRenderError, render_fragment,
    },
};

pub use directives::{CMS_MODULE, cms_module};
pub use document::{DocumentEditor, DocumentError};

pub(crate) const METRIC_RENDER_PAGES: &str = "vellum_render_pages_total";
pub(crate) const METRIC_RENDER_PAGE_MS: &str = "vellum_render_page_ms";

/// Body attribute naming the authoring UI's controller.
pub const CONTROLLER_ATTRIBUTE: &str = "cms-controller";

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("no page template found for `{0}`")]
    TemplateNotFound(String),
    #[error("no page content found at `{0}`")]
    PageNotFound(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error(transparent)]
    View(#[from] TemplateRenderError),
    #[error("failed to encode page data: {0}")]
    Encode(#[from] serde_json::Error),
}

impl From<BindingError> for RenderError {
    fn from(err: BindingError) -> Self {
        Self::Engine(EngineError::Binding(err))
    }
}

/// How a page is being rendered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderOptions {
    /// Resolve content while saving the page as a reusable template.
    pub use_for_template: bool,
    /// Resolve content while creating a page from a template.
    pub use_for_create_page: bool,
    pub admin_mode: bool,
    /// Container directory of the page, used when the content names no template.
    pub request_path: String,
}

impl RenderOptions {
    pub fn page(request_path: impl Into<String>, admin_mode: bool) -> Self {
        Self {
            admin_mode,
            request_path: request_path.into(),
            ..Self::default()
        }
    }

    pub fn for_template() -> Self {
        Self {
            use_for_template: true,
            ..Self::default()
        }
    }

    pub fn for_create_page() -> Self {
        Self {
            use_for_create_page: true,
            ..Self::default()
        }
    }

    fn resolve_only(&self) -> bool {
        self.use_for_template || self.use_for_create_page
    }
}

/// Document hook run after the admin payload is injected, and on template
/// and create-page renders. A filter may rewrite the page content; the
/// caller sees the change through the `&mut PageContent` it passed in.
pub trait PageFilter: Send + Sync {
    fn apply(&self, document: &mut DocumentEditor, content: &mut PageContent) -> Result<(), DocumentError>;
}

#[derive(Debug, Clone)]
pub struct PageSettings {
    /// Public site settings; `base` becomes the document's `<base href>`.
    pub online: Map<String, Value>,
    pub asset_base: String,
    pub controller: String,
}

impl Default for PageSettings {
    fn default() -> Self {
        Self {
            online: Map::new(),
            asset_base: "build".to_string(),
            controller: "appCtrl".to_string(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DataIsland<'a> {
    types: &'a TypeMetadata,
    containers: &'a Map<String, Value>,
    online: &'a Map<String, Value>,
    server_fn: Vec<String>,
    setup_server_fn: Map<String, Value>,
}

/// Build a runtime with the `cms` module followed by `extensions`.
///
/// Pathless extensions must already be registered with the environment.
pub async fn page_engine(
    environment: &EnvironmentHandle,
    extensions: Vec<ModuleDescriptor>,
) -> Result<TemplateEngine, EngineError> {
    environment.registry().register(cms_module()?);
    if let Some(missing) = extensions
        .iter()
        .find(|descriptor| descriptor.path.is_none() && !environment.registry().contains(&descriptor.name))
    {
        return Err(ModuleError::unknown(&missing.name).into());
    }

    let mut descriptors = vec![ModuleDescriptor::registered(CMS_MODULE)];
    descriptors.extend(extensions);
    let engine = TemplateEngine::new(environment, descriptors, |engine| {
        debug!(
            target = "vellum::application::page",
            modules = ?engine.modules(),
            "page engine constructed"
        );
    })?;
    engine.ready().await;
    Ok(engine)
}

#[derive(Clone)]
pub struct PageRenderer {
    engine: TemplateEngine,
    site: Arc<dyn SiteRepo>,
    store: Arc<dyn ContentStore>,
    functions: Arc<ServerFunctions>,
    filters: Vec<Arc<dyn PageFilter>>,
    settings: Arc<PageSettings>,
}

impl PageRenderer {
    pub fn new(
        engine: TemplateEngine,
        site: Arc<dyn SiteRepo>,
        store: Arc<dyn ContentStore>,
        functions: ServerFunctions,
        settings: PageSettings,
    ) -> Self {
        Self {
            engine,
            site,
            store,
            functions: Arc::new(functions),
            filters: Vec::new(),
            settings: Arc::new(settings),
        }
    }

    pub fn with_filter(mut self, filter: impl PageFilter + 'static) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    pub fn site(&self) -> &Arc<dyn SiteRepo> {
        &self.site
    }

    /// Render the page stored in the container directory `request_path`.
    pub async fn render_path(&self, request_path: &str, admin_mode: bool) -> Result<String, RenderError> {
        let mut content = match self.site.page_content(request_path).await {
            Ok(content) => content,
            Err(StoreError::NotFound(_)) => {
                return Err(RenderError::PageNotFound(request_path.to_string()));
            }
            Err(err) => return Err(err.into()),
        };
        self.render(&mut content, &RenderOptions::page(request_path, admin_mode))
            .await
    }

    pub async fn render(
        &self,
        content: &mut PageContent,
        options: &RenderOptions,
    ) -> Result<String, RenderError> {
        let started_at = Instant::now();
        let template_path = self.template_path(content, options).await?;
        let template = match self.site.template(&template_path).await {
            Ok(template) => template,
            Err(StoreError::NotFound(_)) => return Err(RenderError::TemplateNotFound(template_path)),
            Err(err) => return Err(err.into()),
        };
        let mut document = DocumentEditor::load(&template)?;

        let types = Arc::new(TypesBuilder::new(Arc::clone(&self.store)));
        types.init().await?;

        let containers = content.containers.clone();
        let functions = Arc::clone(&self.functions);
        let seeded_types = Arc::clone(&types);
        let compiled = self.engine.compile(document.body_inner()?, move |root| {
            root.insert("containers", Value::Object(containers));
            root.provide(seeded_types);
            root.provide(functions);
        })?;
        let (resolved, stats) = compiled.invoke_with_stats(Value::Object(Map::new())).await?;
        let snapshot = types.snapshot();

        if let Some(base) = self
            .settings
            .online
            .get("base")
            .and_then(Value::as_str)
            .filter(|base| !base.is_empty())
        {
            document.append_head(&render_fragment(BaseHrefTemplate { href: base })?)?;
        }

        let mode = if options.resolve_only() {
            document.replace_body(&resolved)?;
            self.apply_filters(&mut document, content)?;
            "resolve"
        } else if options.admin_mode {
            self.inject_admin(&mut document, content, &snapshot)?;
            "admin"
        } else {
            document.replace_body(&resolved)?;
            document.append_head(&render_fragment(PublicStylesTemplate {
                asset_base: &self.settings.asset_base,
            })?)?;
            "public"
        };

        let elapsed_ms = started_at.elapsed().as_secs_f64() * 1000.0;
        counter!(METRIC_RENDER_PAGES, "mode" => mode).increment(1);
        histogram!(METRIC_RENDER_PAGE_MS, "mode" => mode).record(elapsed_ms);
        info!(
            target = "vellum::application::page",
            template = %template_path,
            mode,
            passes = stats.passes,
            drained_calls = stats.drained_calls,
            elapsed_ms,
            "page rendered"
        );

        Ok(document.into_html())
    }

    async fn template_path(
        &self,
        content: &PageContent,
        options: &RenderOptions,
    ) -> Result<String, RenderError> {
        if let Some(path) = content.path.as_deref().filter(|path| !path.is_empty()) {
            return Ok(path.to_string());
        }
        let tree = self.site.site_tree().await?;
        tree.template_for(&options.request_path)
            .map(str::to_string)
            .ok_or_else(|| RenderError::TemplateNotFound(options.request_path.clone()))
    }

    fn inject_admin(
        &self,
        document: &mut DocumentEditor,
        content: &mut PageContent,
        types: &TypeMetadata,
    ) -> Result<(), RenderError> {
        let island = DataIsland {
            types,
            containers: &content.containers,
            online: &self.settings.online,
            server_fn: self.functions.names(),
            setup_server_fn: self.functions.setup(),
        };
        let json = serde_json::to_string(&island)?.replace("</", "<\\/");
        document.prepend_body(&render_fragment(DataIslandTemplate { json })?)?;

        if !content.disable_inject_lib {
            document.prepend_head(&render_fragment(AdminHeadTemplate {
                asset_base: &self.settings.asset_base,
            })?)?;
            document.set_body_attribute(CONTROLLER_ATTRIBUTE, &self.settings.controller)?;
        }

        self.apply_filters(document, content)
    }

    fn apply_filters(
        &self,
        document: &mut DocumentEditor,
        content: &mut PageContent,
    ) -> Result<(), RenderError> {
        for filter in &self.filters {
            filter.apply(document, content)?;
        }
        Ok(())
    }
}

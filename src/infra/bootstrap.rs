//! Wiring of the page renderer from resolved settings.

use std::sync::Arc;

use tracing::info;

use crate::{
    application::{
        error::AppError,
        page::{PageRenderer, PageSettings, RenderError, page_engine},
        render::EnvironmentHandle,
        repos::{ContentStore, SiteRepo},
        server_fn::ServerFunctions,
    },
    config::Settings,
    infra::{content::JsonContentStore, error::InfraError, site::FsSiteRepo},
};

/// Boot the environment, build the page engine over the configured
/// extension modules, and wire it to the file-backed site.
pub async fn build_renderer(settings: &Settings) -> Result<PageRenderer, AppError> {
    if !settings.site.base_path.is_dir() {
        return Err(InfraError::configuration(format!(
            "site base path `{}` is not a directory",
            settings.site.base_path.display()
        ))
        .into());
    }

    let environment = EnvironmentHandle::new();
    environment
        .boot(&settings.engine.seed_html)
        .await
        .map_err(RenderError::from)?;

    let engine = page_engine(&environment, settings.engine.modules.clone())
        .await
        .map_err(RenderError::from)?;

    let site: Arc<dyn SiteRepo> = Arc::new(FsSiteRepo::new(
        &settings.site.base_path,
        &settings.site.base_url_path,
    ));
    let store: Arc<dyn ContentStore> = Arc::new(JsonContentStore::new(&settings.site.base_path));
    let functions = ServerFunctions::with_builtins(Arc::clone(&store));

    info!(
        target = "vellum::infra::bootstrap",
        site = %settings.site.base_path.display(),
        modules = ?engine.modules(),
        server_fn = ?functions.names(),
        "page renderer ready"
    );

    Ok(PageRenderer::new(
        engine,
        site,
        store,
        functions,
        PageSettings {
            online: settings.site.online.clone(),
            asset_base: settings.admin.asset_base.clone(),
            controller: settings.admin.controller.clone(),
        },
    ))
}

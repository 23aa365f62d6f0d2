use std::{process, sync::Arc};

use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;
use vellum::{
    application::{error::AppError, page::PageRenderer, repos::SiteRepo},
    config,
    infra::{
        bootstrap::build_renderer,
        error::InfraError,
        http::{self, HttpState},
        site::FsSiteRepo,
        telemetry,
    },
};

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Render(args) => run_render(settings, args).await,
        config::Command::SiteMap(_) => run_site_map(settings).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let renderer = build_renderer(&settings).await?;
    serve_http(&settings, renderer).await
}

async fn run_render(settings: config::Settings, args: config::RenderArgs) -> Result<(), AppError> {
    let renderer = build_renderer(&settings).await?;
    let path = args.path.trim_matches('/');

    info!(
        target = "vellum::render",
        path,
        admin = args.admin,
        "Rendering page"
    );

    let html = renderer.render_path(path, args.admin).await?;
    println!("{html}");
    Ok(())
}

async fn run_site_map(settings: config::Settings) -> Result<(), AppError> {
    let site = FsSiteRepo::new(&settings.site.base_path, &settings.site.base_url_path);
    let tree = site
        .site_tree()
        .await
        .map_err(InfraError::from)?;
    let json = serde_json::to_string_pretty(&tree)
        .map_err(|err| AppError::unexpected(format!("failed to encode site map: {err}")))?;
    println!("{json}");
    Ok(())
}

async fn serve_http(settings: &config::Settings, renderer: PageRenderer) -> Result<(), AppError> {
    let router = http::build_router(HttpState {
        renderer: Arc::new(renderer),
        security: settings.site.security,
        base_url_path: settings.site.base_url_path.clone(),
        site_root: settings.site.base_path.clone(),
        bundle_dir: settings.admin.bundle_dir.clone(),
    });

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::listen(settings.server.addr, err)))?;

    info!(
        target = "vellum::serve",
        addr = %settings.server.addr,
        security = settings.site.security,
        "Listening"
    );

    axum::serve(listener, router.into_make_service())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    Ok(())
}

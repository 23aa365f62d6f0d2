//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, path::PathBuf, str::FromStr};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::application::render::{DEFAULT_SEED, ModuleDescriptor};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "vellum";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_SITE_BASE_PATH: &str = "site";
const DEFAULT_BASE_URL_PATH: &str = "/";
const DEFAULT_ASSET_BASE: &str = "build";
const DEFAULT_CONTROLLER: &str = "appCtrl";

/// Command-line arguments for the vellum binary.
#[derive(Debug, Parser)]
#[command(name = "vellum", version, about = "Vellum CMS page renderer")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "VELLUM_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Serve rendered pages over HTTP.
    Serve(Box<ServeArgs>),
    /// Render one page and print the document.
    Render(RenderArgs),
    /// Print the site map as JSON.
    #[command(name = "site-map")]
    SiteMap(SiteMapArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct SiteOverrides {
    /// Override the site content directory.
    #[arg(long = "site-base-path", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub site_base_path: Option<PathBuf>,

    /// Override the URL path the site is served under.
    #[arg(long = "site-base-url-path", value_name = "PATH")]
    pub site_base_url_path: Option<String>,

    /// Serve pages without the authoring UI.
    #[arg(
        long = "site-security",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub site_security: Option<bool>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub site: SiteOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Args, Clone)]
pub struct RenderArgs {
    #[command(flatten)]
    pub site: SiteOverrides,

    /// Container directory of the page, relative to the site base.
    #[arg(value_name = "PATH")]
    pub path: String,

    /// Render with the authoring UI injected.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub admin: bool,
}

#[derive(Debug, Args, Default, Clone)]
pub struct SiteMapArgs {
    #[command(flatten)]
    pub site: SiteOverrides,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub site: SiteSettings,
    pub engine: EngineSettings,
    pub admin: AdminSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct SiteSettings {
    pub base_path: PathBuf,
    /// Always starts and ends with `/`.
    pub base_url_path: String,
    pub security: bool,
    /// Public site settings exposed to the client as `online`.
    pub online: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub seed_html: String,
    pub modules: Vec<ModuleDescriptor>,
}

#[derive(Debug, Clone)]
pub struct AdminSettings {
    pub asset_base: String,
    pub controller: String,
    /// Directory of the authoring UI bundle, served under `/build`.
    pub bundle_dir: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("VELLUM").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Render(args)) => raw.apply_site_overrides(&args.site),
        Some(Command::SiteMap(args)) => raw.apply_site_overrides(&args.site),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    site: RawSiteSettings,
    engine: RawEngineSettings,
    admin: RawAdminSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        self.apply_site_overrides(&overrides.site);
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }

    fn apply_site_overrides(&mut self, overrides: &SiteOverrides) {
        if let Some(path) = overrides.site_base_path.as_ref() {
            self.site.base_path = Some(path.clone());
        }
        if let Some(path) = overrides.site_base_url_path.as_ref() {
            self.site.base_url_path = Some(path.clone());
        }
        if let Some(security) = overrides.site_security {
            self.site.security = Some(security);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            site,
            engine,
            admin,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            site: build_site_settings(site)?,
            engine: build_engine_settings(engine)?,
            admin: build_admin_settings(admin),
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }
    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    Ok(ServerSettings { addr })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_site_settings(site: RawSiteSettings) -> Result<SiteSettings, LoadError> {
    let base_path = site
        .base_path
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SITE_BASE_PATH));
    if base_path.as_os_str().is_empty() {
        return Err(LoadError::invalid("site.base_path", "must not be empty"));
    }

    let base_url_path = normalize_base_url_path(
        site.base_url_path
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL_PATH),
    )
    .map_err(|reason| LoadError::invalid("site.base_url_path", reason))?;

    let mut online = site.online;
    if let Some(base) = site.online_base.filter(|base| !base.trim().is_empty()) {
        online.insert("base".to_string(), Value::String(base.trim().to_string()));
    }

    Ok(SiteSettings {
        base_path,
        base_url_path,
        security: site.security.unwrap_or(false),
        online,
    })
}

fn build_engine_settings(engine: RawEngineSettings) -> Result<EngineSettings, LoadError> {
    let seed_html = engine
        .seed_html
        .filter(|seed| !seed.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_SEED.to_string());

    if let Some(descriptor) = engine
        .modules
        .iter()
        .find(|descriptor| descriptor.name.trim().is_empty())
    {
        return Err(LoadError::invalid(
            "engine.modules",
            format!("module descriptor without a name: {descriptor:?}"),
        ));
    }

    Ok(EngineSettings {
        seed_html,
        modules: engine.modules,
    })
}

fn build_admin_settings(admin: RawAdminSettings) -> AdminSettings {
    AdminSettings {
        asset_base: admin
            .asset_base
            .unwrap_or_else(|| DEFAULT_ASSET_BASE.to_string()),
        controller: admin
            .controller
            .unwrap_or_else(|| DEFAULT_CONTROLLER.to_string()),
        bundle_dir: admin.bundle_dir,
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSiteSettings {
    base_path: Option<PathBuf>,
    base_url_path: Option<String>,
    security: Option<bool>,
    online_base: Option<String>,
    online: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawEngineSettings {
    seed_html: Option<String>,
    modules: Vec<ModuleDescriptor>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawAdminSettings {
    asset_base: Option<String>,
    controller: Option<String>,
    bundle_dir: Option<PathBuf>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn normalize_base_url_path(value: &str) -> Result<String, String> {
    let trimmed = value.trim().trim_matches('/');
    if trimmed.contains(char::is_whitespace) || trimmed.contains("//") {
        return Err(format!("invalid URL path `{value}`"));
    }
    if trimmed.is_empty() {
        Ok("/".to_string())
    } else {
        Ok(format!("/{trimmed}/"))
    }
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

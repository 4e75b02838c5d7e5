//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, num::NonZeroU32, path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::domain::types::RecordField;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "grafite";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_MEDIA_DIR: &str = "media";
const DEFAULT_RENDER_TIMEOUT_SECS: u64 = 120;
const DEFAULT_PNG_DENSITY: u32 = 96;
const DEFAULT_DEBUG_SOURCE_DIR: &str = "debug_tex";
const DEFAULT_CACHE_ENTRY_LIMIT: usize = 1024;
const DEFAULT_CACHE_MAX_VALUE_BYTES: usize = 65536;

/// Command-line arguments for the grafite binary.
#[derive(Debug, Parser)]
#[command(name = "grafite", version, about = "LaTeX-to-image rendering server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "GRAFITE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: Overrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct Overrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the public base URL used to build absolute media links.
    #[arg(long = "server-public-base-url", value_name = "URL")]
    pub server_public_base_url: Option<String>,

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

    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the database pool size.
    #[arg(long = "database-max-connections", value_name = "COUNT")]
    pub database_max_connections: Option<u32>,

    /// Override the per-subprocess render timeout.
    #[arg(long = "render-timeout-seconds", value_name = "SECONDS")]
    pub render_timeout_seconds: Option<u64>,

    /// Keep render workspaces and save sources for debugging.
    #[arg(
        long = "render-keep-workspace",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub render_keep_workspace: Option<bool>,

    /// Override the media storage directory.
    #[arg(long = "media-directory", value_name = "PATH")]
    pub media_directory: Option<PathBuf>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub render: RenderSettings,
    pub cache: CacheSettings,
    pub storage: StorageSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
    /// Base URL for absolute media links; relative paths are served when unset.
    pub public_base_url: Option<Url>,
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
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub latexmk_path: PathBuf,
    pub latex_path: PathBuf,
    pub pdflatex_path: PathBuf,
    pub xelatex_path: PathBuf,
    pub lualatex_path: PathBuf,
    pub dvipng_path: PathBuf,
    pub dvisvgm_path: PathBuf,
    pub pdf2svg_path: PathBuf,
    pub pdfcrop_path: PathBuf,
    pub magick_path: PathBuf,
    /// Raster resolution for the PDF→PNG route.
    pub png_density: u32,
    /// Wall-clock ceiling for each compiler/converter subprocess.
    pub timeout: Duration,
    pub keep_workspace: bool,
    pub debug_source_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub entry_limit: usize,
    pub max_value_bytes: usize,
    pub cacheable_field: Option<RecordField>,
    pub image_returns_relative_path: bool,
    pub data_url_on_save: bool,
}

#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub media_dir: PathBuf,
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

    builder = builder.add_source(Environment::with_prefix("GRAFITE").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    render: RawRenderSettings,
    cache: RawCacheSettings,
    storage: RawStorageSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(url) = overrides.server_public_base_url.as_ref() {
            self.server.public_base_url = Some(url.clone());
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(max) = overrides.database_max_connections {
            self.database.max_connections = Some(max);
        }
        if let Some(seconds) = overrides.render_timeout_seconds {
            self.render.timeout_seconds = Some(seconds);
        }
        if let Some(keep) = overrides.render_keep_workspace {
            self.render.keep_workspace = Some(keep);
        }
        if let Some(directory) = overrides.media_directory.as_ref() {
            self.storage.media_dir = Some(directory.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            database,
            render,
            cache,
            storage,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let database = build_database_settings(database)?;
        let render = build_render_settings(render)?;
        let cache = build_cache_settings(cache)?;
        let storage = build_storage_settings(storage)?;

        Ok(Self {
            server,
            logging,
            database,
            render,
            cache,
            storage,
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

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    let public_base_url = server
        .public_base_url
        .map(|value| {
            Url::parse(&value).map_err(|err| {
                LoadError::invalid("server.public_base_url", format!("failed to parse: {err}"))
            })
        })
        .transpose()?;

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
        public_base_url,
    })
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

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = database.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let max_value = database
        .max_connections
        .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS);
    let max_connections = non_zero_u32(max_value.into(), "database.max_connections")?;

    Ok(DatabaseSettings {
        url,
        max_connections,
    })
}

fn build_render_settings(render: RawRenderSettings) -> Result<RenderSettings, LoadError> {
    let tool = |configured: Option<PathBuf>,
                default_name: &str,
                key: &'static str|
     -> Result<PathBuf, LoadError> {
        let path = configured.unwrap_or_else(|| PathBuf::from(default_name));
        if path.as_os_str().is_empty() {
            return Err(LoadError::invalid(key, "path must not be empty"));
        }
        Ok(path)
    };

    let timeout_seconds = render
        .timeout_seconds
        .unwrap_or(DEFAULT_RENDER_TIMEOUT_SECS);
    if timeout_seconds == 0 {
        return Err(LoadError::invalid(
            "render.timeout_seconds",
            "must be greater than zero",
        ));
    }

    let png_density = render.png_density.unwrap_or(DEFAULT_PNG_DENSITY);
    if png_density == 0 {
        return Err(LoadError::invalid(
            "render.png_density",
            "must be greater than zero",
        ));
    }

    Ok(RenderSettings {
        latexmk_path: tool(render.latexmk_path, "latexmk", "render.latexmk_path")?,
        latex_path: tool(render.latex_path, "latex", "render.latex_path")?,
        pdflatex_path: tool(render.pdflatex_path, "pdflatex", "render.pdflatex_path")?,
        xelatex_path: tool(render.xelatex_path, "xelatex", "render.xelatex_path")?,
        lualatex_path: tool(render.lualatex_path, "lualatex", "render.lualatex_path")?,
        dvipng_path: tool(render.dvipng_path, "dvipng", "render.dvipng_path")?,
        dvisvgm_path: tool(render.dvisvgm_path, "dvisvgm", "render.dvisvgm_path")?,
        pdf2svg_path: tool(render.pdf2svg_path, "pdf2svg", "render.pdf2svg_path")?,
        pdfcrop_path: tool(render.pdfcrop_path, "pdfcrop", "render.pdfcrop_path")?,
        magick_path: tool(render.magick_path, "magick", "render.magick_path")?,
        png_density,
        timeout: Duration::from_secs(timeout_seconds),
        keep_workspace: render.keep_workspace.unwrap_or(false),
        debug_source_dir: render
            .debug_source_dir
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DEBUG_SOURCE_DIR)),
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let cacheable_field = cache
        .cacheable_field
        .map(|name| {
            RecordField::parse(&name).ok_or_else(|| {
                LoadError::invalid(
                    "cache.cacheable_field",
                    format!("unknown record field `{name}`"),
                )
            })
        })
        .transpose()?;

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        entry_limit: cache.entry_limit.unwrap_or(DEFAULT_CACHE_ENTRY_LIMIT),
        max_value_bytes: cache
            .max_value_bytes
            .unwrap_or(DEFAULT_CACHE_MAX_VALUE_BYTES),
        cacheable_field,
        image_returns_relative_path: cache.image_returns_relative_path.unwrap_or(true),
        data_url_on_save: cache.data_url_on_save.unwrap_or(false),
    })
}

fn build_storage_settings(storage: RawStorageSettings) -> Result<StorageSettings, LoadError> {
    let media_dir = storage
        .media_dir
        .unwrap_or_else(|| PathBuf::from(DEFAULT_MEDIA_DIR));
    if media_dir.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "storage.media_dir",
            "path must not be empty",
        ));
    }
    Ok(StorageSettings { media_dir })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
    public_base_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRenderSettings {
    latexmk_path: Option<PathBuf>,
    latex_path: Option<PathBuf>,
    pdflatex_path: Option<PathBuf>,
    xelatex_path: Option<PathBuf>,
    lualatex_path: Option<PathBuf>,
    dvipng_path: Option<PathBuf>,
    dvisvgm_path: Option<PathBuf>,
    pdf2svg_path: Option<PathBuf>,
    pdfcrop_path: Option<PathBuf>,
    magick_path: Option<PathBuf>,
    png_density: Option<u32>,
    timeout_seconds: Option<u64>,
    keep_workspace: Option<bool>,
    debug_source_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    entry_limit: Option<usize>,
    max_value_bytes: Option<usize>,
    cacheable_field: Option<String>,
    image_returns_relative_path: Option<bool>,
    data_url_on_save: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStorageSettings {
    media_dir: Option<PathBuf>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

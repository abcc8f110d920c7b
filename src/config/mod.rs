//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{
    net::SocketAddr,
    num::NonZeroU64,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::application::{pool::PoolConfig, render::RenderDeadlines};

pub use cli::{CliArgs, Command, ConvertArgs, EngineOverrides, ServeArgs, ServeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "pressroom";
const ENV_PREFIX: &str = "PRESSROOM";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 5003;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_POOL_MIN: usize = 1;
const DEFAULT_POOL_MAX: usize = 4;
const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;
const DEFAULT_REAP_INTERVAL_SECS: u64 = 30;
const DEFAULT_LOAD_TIMEOUT_SECS: u64 = 60;
const DEFAULT_RENDER_TIMEOUT_SECS: u64 = 60;
const DEFAULT_SETTLE_IDLE_MS: u64 = 500;
const DEFAULT_ARTIFACT_DIR: &str = "pdfs";
const DEFAULT_MAX_REQUEST_BYTES: u64 = 10 * 1024 * 1024;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub pool: PoolSettings,
    pub render: RenderSettings,
    pub artifacts: ArtifactSettings,
    pub http: HttpSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    /// Base for download links; derived from the request `Host` header when unset.
    pub public_base_url: Option<Url>,
    pub graceful_shutdown: Duration,
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
pub struct PoolSettings {
    pub min: usize,
    pub max: usize,
    pub acquire_timeout: Duration,
    pub idle_timeout: Duration,
    pub max_lifetime: Option<Duration>,
    pub reap_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub load_timeout: Duration,
    pub render_timeout: Duration,
    pub settle_idle: Duration,
    pub chrome_path: Option<PathBuf>,
    pub sandbox: bool,
}

#[derive(Debug, Clone)]
pub struct ArtifactSettings {
    pub directory: PathBuf,
    pub shard: bool,
}

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub max_request_bytes: NonZeroU64,
}

impl Settings {
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            min: self.pool.min,
            max: self.pool.max,
            idle_timeout: self.pool.idle_timeout,
            max_lifetime: self.pool.max_lifetime,
        }
    }

    pub fn render_deadlines(&self) -> RenderDeadlines {
        RenderDeadlines {
            acquire: self.pool.acquire_timeout,
            load: self.render.load_timeout,
            render: self.render.render_timeout,
        }
    }
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

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Convert(args)) => raw.apply_engine_overrides(&args.engine),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    pool: RawPoolSettings,
    render: RawRenderSettings,
    artifacts: RawArtifactSettings,
    http: RawHttpSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(url) = overrides.public_base_url.as_ref() {
            self.server.public_base_url = Some(url.clone());
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(min) = overrides.pool_min {
            self.pool.min = Some(min);
        }
        if let Some(max) = overrides.pool_max {
            self.pool.max = Some(max);
        }
        if let Some(ms) = overrides.pool_acquire_timeout_ms {
            self.pool.acquire_timeout_ms = Some(ms);
        }
        if let Some(limit) = overrides.http_max_request_bytes {
            self.http.max_request_bytes = Some(limit);
        }

        self.apply_engine_overrides(&overrides.engine);
    }

    fn apply_engine_overrides(&mut self, overrides: &EngineOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(path) = overrides.chrome_path.as_ref() {
            self.render.chrome_path = Some(path.clone());
        }
        if let Some(seconds) = overrides.load_timeout_seconds {
            self.render.load_timeout_seconds = Some(seconds);
        }
        if let Some(seconds) = overrides.render_timeout_seconds {
            self.render.render_timeout_seconds = Some(seconds);
        }
        if let Some(directory) = overrides.artifacts_directory.as_ref() {
            self.artifacts.directory = Some(directory.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            pool,
            render,
            artifacts,
            http,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            pool: build_pool_settings(pool)?,
            render: build_render_settings(render)?,
            artifacts: build_artifact_settings(artifacts)?,
            http: build_http_settings(http)?,
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

    let public_base_url = match server.public_base_url {
        Some(value) if !value.trim().is_empty() => {
            let url = Url::parse(value.trim()).map_err(|err| {
                LoadError::invalid("server.public_base_url", format!("failed to parse: {err}"))
            })?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(LoadError::invalid(
                    "server.public_base_url",
                    "scheme must be http or https",
                ));
            }
            Some(url)
        }
        _ => None,
    };

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        public_base_url,
        graceful_shutdown: Duration::from_secs(graceful_secs),
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

fn build_pool_settings(pool: RawPoolSettings) -> Result<PoolSettings, LoadError> {
    let min = pool.min.unwrap_or(DEFAULT_POOL_MIN);
    let max = pool.max.unwrap_or(DEFAULT_POOL_MAX);
    if max == 0 {
        return Err(LoadError::invalid("pool.max", "must be greater than zero"));
    }
    if min > max {
        return Err(LoadError::invalid(
            "pool.min",
            format!("must not exceed pool.max ({max})"),
        ));
    }

    let acquire_timeout =
        Duration::from_millis(pool.acquire_timeout_ms.unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_MS));
    let idle_timeout = positive_seconds(
        pool.idle_timeout_seconds.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS),
        "pool.idle_timeout_seconds",
    )?;
    let reap_interval = positive_seconds(
        pool.reap_interval_seconds
            .unwrap_or(DEFAULT_REAP_INTERVAL_SECS),
        "pool.reap_interval_seconds",
    )?;
    let max_lifetime = pool
        .max_lifetime_seconds
        .map(|secs| positive_seconds(secs, "pool.max_lifetime_seconds"))
        .transpose()?;

    Ok(PoolSettings {
        min,
        max,
        acquire_timeout,
        idle_timeout,
        max_lifetime,
        reap_interval,
    })
}

fn build_render_settings(render: RawRenderSettings) -> Result<RenderSettings, LoadError> {
    let load_timeout = positive_seconds(
        render.load_timeout_seconds.unwrap_or(DEFAULT_LOAD_TIMEOUT_SECS),
        "render.load_timeout_seconds",
    )?;
    let render_timeout = positive_seconds(
        render
            .render_timeout_seconds
            .unwrap_or(DEFAULT_RENDER_TIMEOUT_SECS),
        "render.render_timeout_seconds",
    )?;

    let settle_idle = Duration::from_millis(render.settle_idle_ms.unwrap_or(DEFAULT_SETTLE_IDLE_MS));
    if settle_idle >= load_timeout {
        return Err(LoadError::invalid(
            "render.settle_idle_ms",
            "must be shorter than render.load_timeout_seconds",
        ));
    }

    let chrome_path = render.chrome_path.filter(|path| !path.as_os_str().is_empty());

    Ok(RenderSettings {
        load_timeout,
        render_timeout,
        settle_idle,
        chrome_path,
        sandbox: render.sandbox.unwrap_or(true),
    })
}

fn build_artifact_settings(artifacts: RawArtifactSettings) -> Result<ArtifactSettings, LoadError> {
    let directory = artifacts
        .directory
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ARTIFACT_DIR));
    if directory.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "artifacts.directory",
            "path must not be empty",
        ));
    }

    Ok(ArtifactSettings {
        directory,
        shard: artifacts.shard.unwrap_or(false),
    })
}

fn build_http_settings(http: RawHttpSettings) -> Result<HttpSettings, LoadError> {
    let max_request_bytes_value = http.max_request_bytes.unwrap_or(DEFAULT_MAX_REQUEST_BYTES);
    let max_request_bytes = NonZeroU64::new(max_request_bytes_value)
        .ok_or_else(|| LoadError::invalid("http.max_request_bytes", "must be greater than zero"))?;
    usize::try_from(max_request_bytes_value).map_err(|_| {
        LoadError::invalid(
            "http.max_request_bytes",
            "value exceeds supported range for usize",
        )
    })?;

    Ok(HttpSettings { max_request_bytes })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    public_base_url: Option<String>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPoolSettings {
    min: Option<usize>,
    max: Option<usize>,
    acquire_timeout_ms: Option<u64>,
    idle_timeout_seconds: Option<u64>,
    max_lifetime_seconds: Option<u64>,
    reap_interval_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRenderSettings {
    load_timeout_seconds: Option<u64>,
    render_timeout_seconds: Option<u64>,
    settle_idle_ms: Option<u64>,
    chrome_path: Option<PathBuf>,
    sandbox: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawArtifactSettings {
    directory: Option<PathBuf>,
    shard: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawHttpSettings {
    max_request_bytes: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn positive_seconds(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(value))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[cfg(test)]
mod tests;

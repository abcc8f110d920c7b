use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

use crate::domain::print::PageFormat;

/// Command-line arguments for the pressroom binary.
#[derive(Debug, Parser)]
#[command(name = "pressroom", version, about = "HTML to PDF rendering service")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "PRESSROOM_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP rendering service.
    Serve(Box<ServeArgs>),
    /// Render a single HTML file to PDF and exit.
    Convert(Box<ConvertArgs>),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

/// Settings shared by every command that drives the renderer.
#[derive(Debug, Args, Default, Clone)]
pub struct EngineOverrides {
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

    /// Override the Chromium executable used for rendering.
    #[arg(long = "render-chrome-path", value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub chrome_path: Option<PathBuf>,

    /// Override the document load deadline.
    #[arg(long = "render-load-timeout-seconds", value_name = "SECONDS")]
    pub load_timeout_seconds: Option<u64>,

    /// Override the PDF capture deadline.
    #[arg(long = "render-timeout-seconds", value_name = "SECONDS")]
    pub render_timeout_seconds: Option<u64>,

    /// Override the artifact directory.
    #[arg(long = "artifacts-directory", value_name = "PATH", value_hint = ValueHint::DirPath)]
    pub artifacts_directory: Option<PathBuf>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub engine: EngineOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the base URL used when building download links.
    #[arg(long = "server-public-base-url", value_name = "URL")]
    pub public_base_url: Option<String>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the number of renderers kept warm.
    #[arg(long = "pool-min", value_name = "COUNT")]
    pub pool_min: Option<usize>,

    /// Override the maximum number of concurrent renderers.
    #[arg(long = "pool-max", value_name = "COUNT")]
    pub pool_max: Option<usize>,

    /// Override how long a request waits for a free renderer.
    #[arg(long = "pool-acquire-timeout-ms", value_name = "MILLIS")]
    pub pool_acquire_timeout_ms: Option<u64>,

    /// Override the maximum request body size in bytes.
    #[arg(long = "http-max-request-bytes", value_name = "BYTES")]
    pub http_max_request_bytes: Option<u64>,
}

#[derive(Debug, Args, Clone)]
pub struct ConvertArgs {
    #[command(flatten)]
    pub engine: EngineOverrides,

    /// HTML file to render.
    #[arg(value_name = "INPUT", value_hint = ValueHint::FilePath)]
    pub input: PathBuf,

    /// Where to write the PDF; defaults to the input path with a `.pdf` extension.
    #[arg(long, short, value_name = "OUTPUT", value_hint = ValueHint::FilePath)]
    pub output: Option<PathBuf>,

    /// Store the PDF in the artifact directory and print its identifier instead.
    #[arg(long, action = clap::ArgAction::SetTrue, conflicts_with = "output")]
    pub store: bool,

    /// Paper format (A4, A3, A5, Letter, Legal).
    #[arg(long, value_name = "FORMAT", default_value = "A4")]
    pub format: PageFormat,

    /// Print in landscape orientation.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub landscape: bool,

    /// Uniform page margin in inches.
    #[arg(long, value_name = "INCHES")]
    pub margin: Option<f64>,
}

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

/// Command-line arguments for the contentproxy binary.
#[derive(Debug, Parser)]
#[command(
    name = "contentproxy",
    version,
    about = "Caching reverse proxy with request coalescing"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "CONTENTPROXY_CONFIG_FILE",
        value_name = "PATH",
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the proxy.
    Serve(Box<ServeArgs>),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the path prefix the proxy is mounted under.
    #[arg(long = "path-prefix", value_name = "PREFIX")]
    pub path_prefix: Option<String>,

    /// Override the upstream base URL.
    #[arg(long = "backend-url", value_name = "URL", value_hint = ValueHint::Url)]
    pub backend_url: Option<String>,

    /// Override the upstream request timeout.
    #[arg(long = "backend-timeout-seconds", value_name = "SECONDS")]
    pub backend_timeout_seconds: Option<u64>,

    /// Webhook called after every invalidation; repeat for several. Replaces configured ones.
    #[arg(long = "webhook-url", value_name = "URL", value_hint = ValueHint::Url)]
    pub webhook_urls: Vec<String>,

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

    /// Toggle the Prometheus scrape endpoint.
    #[arg(
        long = "metrics-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub metrics_enabled: Option<bool>,

    /// Override the path the Prometheus scrape endpoint is served on.
    #[arg(long = "metrics-path", value_name = "PATH")]
    pub metrics_path: Option<String>,
}

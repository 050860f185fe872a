//! Command line and environment configuration
use clap::{ArgAction, Args, Parser, ValueEnum};
use std::{fmt, net::SocketAddr, path::PathBuf};

/// Watches cluster events, counts them and forwards them to a sink
#[derive(Parser, Debug, Clone)]
#[command(name = "eventrouter", version, about)]
pub struct Config {
    /// Maintain per-severity event counters and serve them on `--metrics-addr`
    #[arg(
        long,
        env = "EVENTROUTER_ENABLE_METRICS",
        default_value_t = true,
        action = ArgAction::Set
    )]
    pub enable_metrics: bool,

    /// Address for the `/metrics` and `/healthz` endpoints
    #[arg(long, env = "EVENTROUTER_METRICS_ADDR", default_value = "0.0.0.0:8080")]
    pub metrics_addr: SocketAddr,

    /// Only watch events in this namespace (default: all namespaces)
    #[arg(long, env = "EVENTROUTER_NAMESPACE")]
    pub namespace: Option<String>,

    #[command(flatten)]
    pub sink: SinkConfig,
}

/// The closed set of sink backends
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SinkKind {
    /// Structured log records through `tracing`
    #[default]
    Log,
    /// One JSON document per line on stdout
    Stdout,
    /// JSON lines appended to a file
    File,
    /// Batched JSON lines POSTed to an HTTP endpoint
    Http,
    /// Discard everything
    Null,
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SinkKind::Log => "log",
            SinkKind::Stdout => "stdout",
            SinkKind::File => "file",
            SinkKind::Http => "http",
            SinkKind::Null => "null",
        })
    }
}

/// Sink selection plus the settings of each backend
#[derive(Args, Debug, Clone)]
pub struct SinkConfig {
    /// Where routed events go
    #[arg(long = "sink", env = "EVENTROUTER_SINK", value_enum, default_value_t = SinkKind::Log)]
    pub kind: SinkKind,

    /// Wrap every stdout document in an object under this key
    #[arg(long, env = "EVENTROUTER_STDOUT_JSON_NAMESPACE")]
    pub stdout_json_namespace: Option<String>,

    /// File the `file` sink appends to
    #[arg(long, env = "EVENTROUTER_FILE_PATH")]
    pub file_path: Option<PathBuf>,

    /// Endpoint the `http` sink POSTs to
    #[arg(long, env = "EVENTROUTER_HTTP_ENDPOINT")]
    pub http_endpoint: Option<String>,

    /// Events buffered by the `file` and `http` sinks before new ones are dropped
    #[arg(long, env = "EVENTROUTER_SINK_BUFFER_SIZE", default_value_t = 1500)]
    pub sink_buffer_size: usize,

    /// Maximum events per HTTP request
    #[arg(long, env = "EVENTROUTER_HTTP_BATCH_SIZE", default_value_t = 100)]
    pub http_batch_size: usize,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            kind: SinkKind::default(),
            stdout_json_namespace: None,
            file_path: None,
            http_endpoint: None,
            sink_buffer_size: 1500,
            http_batch_size: 100,
        }
    }
}

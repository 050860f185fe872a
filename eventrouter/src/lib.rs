//! Routes Kubernetes events to metrics and pluggable sinks
//!
//! Events are short-lived: the apiserver garbage collects them after their TTL expires.
//! The [`EventRouter`] subscribes to a [`ChangeStream`] of core/v1 events, counts every
//! add and update per severity in [`EventMetrics`], and forwards them to one
//! [`EventSink`](sinks::EventSink) for durable storage or alerting.
//!
//! ```no_run
//! use eventrouter::{sinks::LogSink, EventMetrics, EventRouter, Informer};
//! use k8s_openapi::api::core::v1::Event;
//! use kube::{runtime::{watcher, WatchStreamExt}, Api, Client};
//! use tokio_util::sync::CancellationToken;
//! # async fn wrapper() -> Result<(), Box<dyn std::error::Error>> {
//! let client = Client::try_default().await?;
//! let events: Api<Event> = Api::all(client);
//!
//! let registry = prometheus::Registry::new();
//! let informer = Informer::new();
//! let metrics = EventMetrics::new(&registry)?;
//! let router = EventRouter::new(informer.clone(), Box::new(LogSink), metrics);
//!
//! tokio::spawn(async move {
//!     informer.run(watcher(events, watcher::Config::default()).default_backoff()).await
//! });
//! router.run(CancellationToken::new()).await?;
//! # Ok(())
//! # }
//! ```

pub mod classify;
pub mod config;
pub mod controller;
pub mod informer;
pub mod metrics;
pub mod server;
pub mod sinks;

pub use classify::{classify, EventLabels, Severity};
pub use controller::{EventRouter, RouterState};
pub use informer::{ChangeStream, Informer, ResourceEventHandler};
pub use metrics::{EventMetrics, Removal};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a `fmt` subscriber filtered by `RUST_LOG`, falling back to `default_directive`
pub fn init_tracing(default_directive: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .try_init();
}

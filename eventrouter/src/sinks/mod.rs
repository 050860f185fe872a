//! Downstream consumers of routed events
//!
//! A sink receives every add and update the router observes as a `(new, old)` pair and
//! is responsible for its own buffering: [`EventSink::publish`] is called from the
//! informer's task and must return promptly, whatever the backend does with the event.
mod file;
mod http;
mod log;
mod queue;
mod stdout;

pub use self::{file::FileSink, http::HttpSink, log::LogSink, stdout::StdoutSink};
use crate::config::{SinkConfig, SinkKind};
use k8s_openapi::api::core::v1::Event;
use serde::Serialize;
use std::{path::PathBuf, sync::Arc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("the {kind} sink requires --{setting}")]
    MissingSetting { kind: SinkKind, setting: &'static str },
    #[error("invalid http endpoint: {0}")]
    InvalidEndpoint(#[source] ::http::uri::InvalidUri),
    #[error("unsupported http endpoint scheme {0:?}, expected http")]
    UnsupportedScheme(Option<String>),
    #[error("failed to open {}: {source}", path.display())]
    OpenFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A pluggable destination for routed events
pub trait EventSink: Send + Sync {
    /// Forward `new`, with `old` holding the previous state on updates
    ///
    /// Failures are the sink's to log; nothing is returned to the router.
    fn publish(&self, new: &Event, old: Option<&Event>);
}

impl<S: EventSink + ?Sized> EventSink for Arc<S> {
    fn publish(&self, new: &Event, old: Option<&Event>) {
        (**self).publish(new, old);
    }
}

impl<S: EventSink + ?Sized> EventSink for Box<S> {
    fn publish(&self, new: &Event, old: Option<&Event>) {
        (**self).publish(new, old);
    }
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _new: &Event, _old: Option<&Event>) {}
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verb {
    Added,
    Updated,
}

/// The envelope every serializing sink emits
#[derive(Serialize, Debug, Clone, Copy)]
pub struct EventData<'a> {
    pub verb: Verb,
    pub event: &'a Event,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_event: Option<&'a Event>,
}

impl<'a> EventData<'a> {
    #[must_use]
    pub fn new(new: &'a Event, old: Option<&'a Event>) -> Self {
        Self {
            verb: if old.is_some() { Verb::Updated } else { Verb::Added },
            event: new,
            old_event: old,
        }
    }
}

/// Build the sink selected by `config`
///
/// Buffered sinks spawn their worker task here, so this must be called within a tokio runtime.
///
/// # Errors
///
/// Fails when the selected backend is missing a required setting, or its target cannot be opened.
pub fn manufacture_sink(config: &SinkConfig) -> Result<Box<dyn EventSink>, Error> {
    let missing = |setting| Error::MissingSetting {
        kind: config.kind,
        setting,
    };
    Ok(match config.kind {
        SinkKind::Log => Box::new(LogSink),
        SinkKind::Stdout => Box::new(StdoutSink::new(
            config.stdout_json_namespace.clone(),
            config.sink_buffer_size,
        )),
        SinkKind::File => {
            let path = config.file_path.as_ref().ok_or_else(|| missing("file-path"))?;
            Box::new(FileSink::open(path, config.sink_buffer_size)?)
        }
        SinkKind::Http => {
            let endpoint = config
                .http_endpoint
                .as_deref()
                .ok_or_else(|| missing("http-endpoint"))?;
            Box::new(HttpSink::new(
                endpoint,
                config.sink_buffer_size,
                config.http_batch_size,
            )?)
        }
        SinkKind::Null => Box::new(NullSink),
    })
}

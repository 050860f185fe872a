use super::{
    queue::{write_lines, LineQueue},
    EventData, EventSink,
};
use k8s_openapi::api::core::v1::Event;
use serde::Serialize;
use std::collections::BTreeMap;

/// Writes one JSON document per event to stdout
///
/// With a namespace configured, each document is wrapped as `{"<namespace>": envelope}`
/// so that log shippers can route on the top-level key.
pub struct StdoutSink {
    namespace: Option<String>,
    queue: LineQueue,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Document<'a> {
    Plain(EventData<'a>),
    Namespaced(BTreeMap<&'a str, EventData<'a>>),
}

fn document<'a>(namespace: Option<&'a str>, data: EventData<'a>) -> Document<'a> {
    match namespace {
        Some(ns) => Document::Namespaced(BTreeMap::from([(ns, data)])),
        None => Document::Plain(data),
    }
}

impl StdoutSink {
    #[must_use]
    pub fn new(namespace: Option<String>, buffer_size: usize) -> Self {
        Self {
            namespace,
            queue: LineQueue::spawn("stdout", buffer_size, |rx| {
                write_lines("stdout", tokio::io::stdout(), rx)
            }),
        }
    }

    /// Write everything published so far and stop the writer
    pub async fn close(self) {
        self.queue.close().await;
    }
}

impl EventSink for StdoutSink {
    fn publish(&self, new: &Event, old: Option<&Event>) {
        self.queue
            .push(&document(self.namespace.as_deref(), EventData::new(new, old)));
    }
}

use super::{EventData, EventSink};
use k8s_openapi::api::core::v1::Event;
use tracing::{info, warn};

/// Emits each envelope as an `info` record on the `eventrouter::sink` target
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn publish(&self, new: &Event, old: Option<&Event>) {
        let data = EventData::new(new, old);
        match serde_json::to_string(&data) {
            Ok(json) => info!(target: "eventrouter::sink", verb = ?data.verb, "{json}"),
            Err(err) => warn!(error = %err, "failed to serialize event"),
        }
    }
}

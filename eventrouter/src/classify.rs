//! Maps events onto the label tuple and severity class used for bookkeeping
use k8s_openapi::api::core::v1::Event;
use std::fmt;

/// Label names attached to every event counter, in [`EventLabels::values`] order
pub const LABEL_NAMES: [&str; 6] = [
    "involved_object_kind",
    "involved_object_name",
    "involved_object_namespace",
    "reason",
    "source",
    "event_name",
];

/// Severity class of an event, derived from its `type` field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    /// `type: Normal`
    Normal,
    /// `type: Warning`
    Warning,
    /// `type: Info`
    Info,
    /// Anything else, including a missing `type`
    Unknown,
}

impl Severity {
    /// All severity classes, one counter each
    pub const ALL: [Severity; 4] = [
        Severity::Normal,
        Severity::Warning,
        Severity::Info,
        Severity::Unknown,
    ];

    /// Matches the raw `type` string exactly; case variations collapse to `Unknown`
    #[must_use]
    pub fn from_type(type_: Option<&str>) -> Self {
        match type_ {
            Some("Normal") => Severity::Normal,
            Some("Warning") => Severity::Warning,
            Some("Info") => Severity::Info,
            _ => Severity::Unknown,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Normal => "Normal",
            Severity::Warning => "Warning",
            Severity::Info => "Info",
            Severity::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The 6-tuple addressing one counter entry
///
/// Missing optional fields on the event are represented as the empty string,
/// which is also what Prometheus does with an unset label.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct EventLabels {
    pub kind: String,
    pub name: String,
    pub namespace: String,
    pub reason: String,
    pub source_host: String,
    pub event_name: String,
}

impl EventLabels {
    /// Label values in [`LABEL_NAMES`] order
    #[must_use]
    pub fn values(&self) -> [&str; 6] {
        [
            &self.kind,
            &self.name,
            &self.namespace,
            &self.reason,
            &self.source_host,
            &self.event_name,
        ]
    }
}

impl fmt::Display for EventLabels {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}.{} reason={} source={} event={}",
            self.kind, self.namespace, self.name, self.reason, self.source_host, self.event_name
        )
    }
}

/// Derive the counter key and severity class of an event
///
/// Pure and deterministic, so that add, update and delete of the same record
/// all land on the same counter entry.
#[must_use]
pub fn classify(event: &Event) -> (EventLabels, Severity) {
    let obj = &event.involved_object;
    let labels = EventLabels {
        kind: obj.kind.clone().unwrap_or_default(),
        name: obj.name.clone().unwrap_or_default(),
        namespace: obj.namespace.clone().unwrap_or_default(),
        reason: event.reason.clone().unwrap_or_default(),
        source_host: event
            .source
            .as_ref()
            .and_then(|s| s.host.clone())
            .unwrap_or_default(),
        event_name: event.metadata.name.clone().unwrap_or_default(),
    };
    (labels, Severity::from_type(event.type_.as_deref()))
}

//! Per-severity event counters
//!
//! Four [`IntCounterVec`] families keyed by [`EventLabels`], registered against an injected
//! [`Registry`] so that every router (and every test) owns its own set.
use crate::classify::{EventLabels, Severity, LABEL_NAMES};
use prometheus::{core::Collector, IntCounterVec, Opts, Registry};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to register event counters: {0}")]
    Register(#[source] prometheus::Error),
}

/// Outcome of [`EventMetrics::remove`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// A matching entry existed and was dropped
    Removed,
    /// No entry for that label tuple in that severity's counter
    NotFound,
    /// Metrics collection is turned off
    Disabled,
}

#[derive(Clone, Debug)]
struct Counters {
    normal: IntCounterVec,
    warning: IntCounterVec,
    info: IntCounterVec,
    unknown: IntCounterVec,
}

impl Counters {
    fn new() -> Result<Self, prometheus::Error> {
        let family =
            |name: &str, help: &str| IntCounterVec::new(Opts::new(name, help), &LABEL_NAMES);
        Ok(Self {
            normal: family("events_normal_total", "Total number of normal events in the cluster")?,
            warning: family(
                "events_warnings_total",
                "Total number of warning events in the cluster",
            )?,
            info: family("events_info_total", "Total number of info events in the cluster")?,
            unknown: family(
                "events_unknown_total",
                "Total number of events of unknown type in the cluster",
            )?,
        })
    }

    fn get(&self, severity: Severity) -> &IntCounterVec {
        match severity {
            Severity::Normal => &self.normal,
            Severity::Warning => &self.warning,
            Severity::Info => &self.info,
            Severity::Unknown => &self.unknown,
        }
    }
}

/// Counter bookkeeping for routed events
///
/// Cloning produces a new handle to the same counters. All operations are safe to call
/// concurrently; the underlying metric vectors synchronize internally.
#[derive(Clone, Debug)]
pub struct EventMetrics {
    counters: Option<Counters>,
}

impl EventMetrics {
    /// Create the four counter families and register them with `registry`
    ///
    /// # Errors
    ///
    /// Fails if the registry already holds collectors with the same names.
    pub fn new(registry: &Registry) -> Result<Self, Error> {
        let counters = Counters::new().map_err(Error::Register)?;
        for severity in Severity::ALL {
            registry
                .register(Box::new(counters.get(severity).clone()))
                .map_err(Error::Register)?;
        }
        Ok(Self {
            counters: Some(counters),
        })
    }

    /// Metrics that record nothing and expose nothing
    #[must_use]
    pub fn disabled() -> Self {
        Self { counters: None }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.counters.is_some()
    }

    /// Add one occurrence for `labels` in the `severity` counter, creating the entry at 1 if absent
    pub fn increment(&self, severity: Severity, labels: &EventLabels) {
        if let Some(counters) = &self.counters {
            counters.get(severity).with_label_values(&labels.values()).inc();
        }
    }

    /// Drop the entry for `labels` from the `severity` counter
    ///
    /// A subsequent [`increment`](Self::increment) for the same tuple starts over at 1.
    pub fn remove(&self, severity: Severity, labels: &EventLabels) -> Removal {
        let Some(counters) = &self.counters else {
            return Removal::Disabled;
        };
        match counters.get(severity).remove_label_values(&labels.values()) {
            Ok(()) => Removal::Removed,
            Err(_) => Removal::NotFound,
        }
    }

    /// Current value of one entry, `None` when there is no such entry
    ///
    /// Reads the collected snapshot, so unlike `with_label_values` this never creates an entry.
    #[must_use]
    pub fn value(&self, severity: Severity, labels: &EventLabels) -> Option<u64> {
        let counters = self.counters.as_ref()?;
        let wanted = labels.values();
        counters
            .get(severity)
            .collect()
            .iter()
            .flat_map(|family| family.get_metric())
            .find(|metric| {
                let pairs = metric.get_label();
                pairs.len() == LABEL_NAMES.len()
                    && LABEL_NAMES.iter().zip(wanted).all(|(name, value)| {
                        pairs
                            .iter()
                            .any(|pair| pair.get_name() == *name && pair.get_value() == value)
                    })
            })
            .map(|metric| metric.get_counter().get_value() as u64)
    }

    /// Number of distinct label tuples held by the `severity` counter
    #[must_use]
    pub fn entries(&self, severity: Severity) -> usize {
        self.counters.as_ref().map_or(0, |counters| {
            counters
                .get(severity)
                .collect()
                .iter()
                .map(|family| family.get_metric().len())
                .sum()
        })
    }
}

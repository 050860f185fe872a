//! The event router: counts every observed event and forwards adds and updates to a sink
use crate::{
    classify::classify,
    informer::{ChangeStream, ResourceEventHandler},
    metrics::EventMetrics,
    sinks::EventSink,
};
use k8s_openapi::api::core::v1::Event;
use std::{
    any::Any,
    panic::{self, AssertUnwindSafe},
    sync::Arc,
};
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

#[derive(Debug, Error)]
pub enum Error {
    #[error("cancelled while waiting for the initial event list to sync")]
    InitialSyncCancelled,
}

/// Lifecycle of an [`EventRouter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouterState {
    Created,
    /// The initial list has been synced and events are being routed
    Running,
    ShuttingDown,
}

/// Routes events from a [`ChangeStream`] into [`EventMetrics`] and an [`EventSink`]
///
/// Construction subscribes the router to the stream; [`run`](Self::run) then gates on the
/// initial sync and holds the router alive until shutdown. Routing itself happens in the
/// stream's callbacks, so every event seen by the stream is counted even before the sync
/// completes, exactly like the initial list replayed as adds.
pub struct EventRouter<S> {
    stream: S,
    state: watch::Sender<RouterState>,
}

impl<S> EventRouter<S>
where
    S: ChangeStream<Event>,
{
    /// Subscribe a new router to `stream`
    ///
    /// Pass [`EventMetrics::disabled`] to turn counting off entirely.
    pub fn new(stream: S, sink: Box<dyn EventSink>, metrics: EventMetrics) -> Self {
        stream.add_event_handler(Arc::new(Router { sink, metrics }));
        Self {
            stream,
            state: watch::Sender::new(RouterState::Created),
        }
    }

    #[must_use]
    pub fn state(&self) -> RouterState {
        *self.state.borrow()
    }

    /// Observe lifecycle transitions
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<RouterState> {
        self.state.subscribe()
    }

    /// Wait for the initial sync, then route events until `shutdown` is cancelled
    ///
    /// # Errors
    ///
    /// Returns [`Error::InitialSyncCancelled`] if `shutdown` fires before the stream
    /// has synced; the router never enters [`RouterState::Running`] in that case.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), Error> {
        info!("Starting EventRouter");
        if !self.stream.wait_for_initial_sync(&shutdown).await {
            let err = Error::InitialSyncCancelled;
            error!(error = %err, "EventRouter failed to start");
            self.state.send_replace(RouterState::ShuttingDown);
            return Err(err);
        }
        self.state.send_replace(RouterState::Running);
        info!("EventRouter synced and running");

        shutdown.cancelled().await;
        self.state.send_replace(RouterState::ShuttingDown);
        info!("Shutting down EventRouter");
        Ok(())
    }
}

/// The callbacks handed to the change stream
struct Router {
    sink: Box<dyn EventSink>,
    metrics: EventMetrics,
}

impl Router {
    fn count(&self, event: &Event) {
        let (labels, severity) = classify(event);
        self.metrics.increment(severity, &labels);
    }
}

impl ResourceEventHandler<Event> for Router {
    fn on_add(&self, obj: &Event) {
        recover("add", obj, || {
            self.count(obj);
            self.sink.publish(obj, None);
        });
    }

    // Always keyed on the new event, entries for an old label tuple are left behind
    fn on_update(&self, old: &Event, new: &Event) {
        recover("update", new, || {
            self.count(new);
            self.sink.publish(new, Some(old));
        });
    }

    /// Only happens when events expire, which is not worth forwarding to the sink
    fn on_delete(&self, obj: &Event) {
        recover("delete", obj, || {
            let (labels, severity) = classify(obj);
            let removal = self.metrics.remove(severity, &labels);
            debug!(
                event = %labels.event_name,
                %severity,
                ?removal,
                "event deleted from the system"
            );
            trace!(?obj, "deleted event");
        });
    }
}

/// Runs one callback, logging a panic instead of unwinding into the change stream
fn recover(callback: &'static str, event: &Event, f: impl FnOnce()) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
        error!(
            callback,
            event = event.metadata.name.as_deref().unwrap_or_default(),
            panic = panic_message(payload.as_ref()),
            "recovered from panic while routing event"
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic payload")
}

#[cfg(test)]
mod tests {
    use super::{Error, EventRouter, RouterState};
    use crate::{
        classify::{classify, tests::evicted_pod, Severity},
        informer::Informer,
        metrics::{EventMetrics, Removal},
        sinks::{tests::RecordingSink, EventSink},
    };
    use k8s_openapi::api::core::v1::Event;
    use kube::runtime::watcher;
    use parking_lot::Mutex;
    use prometheus::Registry;
    use std::{io, sync::Arc, time::Duration};
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;
    use tracing::subscriber::DefaultGuard;

    /// Formatted log output of the current thread
    #[derive(Clone, Default)]
    struct Logs(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Logs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Logs {
        fn capture() -> (Self, DefaultGuard) {
            let logs = Self::default();
            let subscriber = tracing_subscriber::fmt()
                .with_ansi(false)
                .with_writer({
                    let logs = logs.clone();
                    move || logs.clone()
                })
                .finish();
            (logs, tracing::subscriber::set_default(subscriber))
        }

        fn errors(&self) -> Vec<String> {
            String::from_utf8_lossy(&self.0.lock())
                .lines()
                .filter(|line| line.contains("ERROR"))
                .map(String::from)
                .collect()
        }
    }

    struct Harness {
        informer: Informer<Event>,
        metrics: EventMetrics,
        sink: Arc<RecordingSink>,
        router: EventRouter<Informer<Event>>,
    }

    fn harness(metrics: EventMetrics) -> Harness {
        let informer = Informer::new();
        let sink = Arc::new(RecordingSink::default());
        let router = EventRouter::new(informer.clone(), Box::new(sink.clone()), metrics.clone());
        Harness {
            informer,
            metrics,
            sink,
            router,
        }
    }

    fn enabled() -> Harness {
        harness(EventMetrics::new(&Registry::new()).unwrap())
    }

    fn with_count(mut ev: Event, count: i32) -> Event {
        ev.count = Some(count);
        ev
    }

    #[test]
    fn add_then_updates_accumulate() {
        let h = enabled();
        let ev = evicted_pod("Normal");
        h.informer.apply_watcher_event(&watcher::Event::Apply(ev.clone()));
        for n in 2..=4 {
            h.informer
                .apply_watcher_event(&watcher::Event::Apply(with_count(ev.clone(), n)));
        }
        let (labels, severity) = classify(&ev);
        assert_eq!(h.metrics.value(severity, &labels), Some(4));
    }

    #[test]
    fn evicted_pod_warning_goes_up_then_back_down() {
        let h = enabled();
        let ev = evicted_pod("Warning");
        let (labels, _) = classify(&ev);
        assert_eq!(h.metrics.value(Severity::Warning, &labels), None);

        h.informer.apply_watcher_event(&watcher::Event::Apply(ev.clone()));
        assert_eq!(h.metrics.value(Severity::Warning, &labels), Some(1));

        h.informer.apply_watcher_event(&watcher::Event::Delete(ev.clone()));
        assert_eq!(h.metrics.value(Severity::Warning, &labels), None);

        h.informer.apply_watcher_event(&watcher::Event::Apply(ev));
        assert_eq!(h.metrics.value(Severity::Warning, &labels), Some(1));
    }

    #[test]
    fn delete_of_never_counted_event_is_a_noop() {
        let h = enabled();
        let ev = evicted_pod("Info");
        h.informer.apply_watcher_event(&watcher::Event::Delete(ev.clone()));
        let (labels, severity) = classify(&ev);
        assert_eq!(h.metrics.value(severity, &labels), None);
        assert_eq!(h.metrics.remove(severity, &labels), Removal::NotFound);
        assert!(h.sink.0.lock().is_empty());
    }

    #[test]
    fn sink_sees_adds_and_updates_but_not_deletes() {
        let h = enabled();
        let first = evicted_pod("Warning");
        let second = with_count(first.clone(), 2);
        h.informer.apply_watcher_event(&watcher::Event::Apply(first.clone()));
        h.informer.apply_watcher_event(&watcher::Event::Apply(second.clone()));
        h.informer.apply_watcher_event(&watcher::Event::Delete(second.clone()));

        let published = h.sink.0.lock().clone();
        assert_eq!(published, vec![(first.clone(), None), (second, Some(first))]);
    }

    #[test]
    fn severity_change_on_update_leaves_old_entry_behind() {
        // Known limitation: updates are keyed on the new event only
        let h = enabled();
        let normal = evicted_pod("Normal");
        let warning = evicted_pod("Warning");
        let (labels, _) = classify(&normal);
        h.informer.apply_watcher_event(&watcher::Event::Apply(normal));
        h.informer.apply_watcher_event(&watcher::Event::Apply(warning.clone()));
        h.informer.apply_watcher_event(&watcher::Event::Delete(warning));

        assert_eq!(h.metrics.value(Severity::Warning, &labels), None);
        assert_eq!(h.metrics.value(Severity::Normal, &labels), Some(1));
    }

    #[test]
    fn reason_change_on_update_leaves_old_entry_behind() {
        // Known limitation: the old label tuple is never cleaned up
        let h = enabled();
        let backoff = evicted_pod("Warning");
        let mut failed = backoff.clone();
        failed.reason = Some("Failed".into());
        h.informer.apply_watcher_event(&watcher::Event::Apply(backoff.clone()));
        h.informer.apply_watcher_event(&watcher::Event::Apply(failed.clone()));
        h.informer.apply_watcher_event(&watcher::Event::Delete(failed.clone()));

        assert_eq!(h.metrics.value(Severity::Warning, &classify(&backoff).0), Some(1));
        assert_eq!(h.metrics.value(Severity::Warning, &classify(&failed).0), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn concurrent_adds_are_not_lost() {
        let h = enabled();
        let tasks = (0..1000)
            .map(|i| {
                let informer = h.informer.clone();
                tokio::spawn(async move {
                    let mut ev = evicted_pod("Normal");
                    ev.metadata.name = Some(format!("p{i}.16a2"));
                    ev.involved_object.name = Some(format!("p{i}"));
                    informer.apply_watcher_event(&watcher::Event::Apply(ev));
                })
            })
            .collect::<Vec<_>>();
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(h.metrics.entries(Severity::Normal), 1000);
        let mut ev = evicted_pod("Normal");
        ev.metadata.name = Some("p500.16a2".into());
        ev.involved_object.name = Some("p500".into());
        assert_eq!(h.metrics.value(Severity::Normal, &classify(&ev).0), Some(1));
        assert_eq!(h.sink.0.lock().len(), 1000);
    }

    #[test]
    fn disabled_metrics_still_route_to_the_sink() {
        let h = harness(EventMetrics::disabled());
        let ev = evicted_pod("Warning");
        h.informer.apply_watcher_event(&watcher::Event::Apply(ev.clone()));
        h.informer
            .apply_watcher_event(&watcher::Event::Apply(with_count(ev.clone(), 2)));
        h.informer.apply_watcher_event(&watcher::Event::Delete(ev));

        assert!(!h.metrics.is_enabled());
        for severity in Severity::ALL {
            assert_eq!(h.metrics.entries(severity), 0);
        }
        assert_eq!(h.sink.0.lock().len(), 2);
    }

    struct PanicOn(&'static str, Arc<RecordingSink>);

    impl EventSink for PanicOn {
        fn publish(&self, new: &Event, old: Option<&Event>) {
            if new.reason.as_deref() == Some(self.0) {
                panic!("malformed event");
            }
            self.1.publish(new, old);
        }
    }

    #[test]
    fn panicking_callback_does_not_stop_routing() {
        let (logs, _guard) = Logs::capture();
        let informer = Informer::new();
        let sink = Arc::new(RecordingSink::default());
        let metrics = EventMetrics::new(&Registry::new()).unwrap();
        let _router = EventRouter::new(
            informer.clone(),
            Box::new(PanicOn("Poisoned", sink.clone())),
            metrics.clone(),
        );

        let mut poisoned = evicted_pod("Warning");
        poisoned.reason = Some("Poisoned".into());
        poisoned.metadata.name = Some("bad".into());
        informer.apply_watcher_event(&watcher::Event::Apply(poisoned));
        informer.apply_watcher_event(&watcher::Event::Apply(evicted_pod("Warning")));

        assert_eq!(sink.0.lock().len(), 1);
        let (labels, _) = classify(&evicted_pod("Warning"));
        assert_eq!(metrics.value(Severity::Warning, &labels), Some(1));

        let errors = logs.errors();
        assert_eq!(errors.len(), 1, "{errors:?}");
        assert!(errors[0].contains("recovered from panic while routing event"));
        assert!(errors[0].contains("callback=\"add\""), "{}", errors[0]);
        assert!(errors[0].contains("malformed event"), "{}", errors[0]);
    }

    #[tokio::test]
    async fn run_enters_running_after_sync_and_stops_on_shutdown() {
        let h = enabled();
        let router = Arc::new(h.router);
        let shutdown = CancellationToken::new();
        let mut states = router.subscribe_state();
        assert_eq!(router.state(), RouterState::Created);

        let run = tokio::spawn({
            let router = router.clone();
            let shutdown = shutdown.clone();
            async move { router.run(shutdown).await }
        });
        tokio::task::yield_now().await;
        assert_eq!(router.state(), RouterState::Created);

        h.informer.apply_watcher_event(&watcher::Event::Init);
        h.informer
            .apply_watcher_event(&watcher::Event::InitApply(evicted_pod("Normal")));
        h.informer.apply_watcher_event(&watcher::Event::InitDone);
        states
            .wait_for(|s| *s == RouterState::Running)
            .await
            .unwrap();
        assert_eq!(h.sink.0.lock().len(), 1);

        shutdown.cancel();
        run.await.unwrap().unwrap();
        assert_eq!(router.state(), RouterState::ShuttingDown);
    }

    #[tokio::test(start_paused = true)]
    async fn run_gives_up_when_cancelled_before_sync() {
        let (logs, _guard) = Logs::capture();
        let h = enabled();
        let shutdown = CancellationToken::new();
        let start = Instant::now();
        tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(30)).await;
                shutdown.cancel();
            }
        });

        let result = h.router.run(shutdown).await;
        assert!(matches!(result, Err(Error::InitialSyncCancelled)));
        assert!(start.elapsed() >= Duration::from_secs(30));
        assert_ne!(h.router.state(), RouterState::Running);

        let errors = logs.errors();
        assert_eq!(errors.len(), 1, "{errors:?}");
        assert!(errors[0].contains("EventRouter failed to start"));
        assert!(errors[0].contains("initial event list"), "{}", errors[0]);
    }
}

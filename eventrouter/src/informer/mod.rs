//! Turns a watch stream into add/update/delete callbacks
//!
//! The [`ChangeStream`] trait is the seam the [`EventRouter`](crate::EventRouter) is written
//! against. [`Informer`] is the in-process implementation used by the binary: it caches
//! the last-seen state of every object coming off a [`watcher()`](kube::runtime::watcher())
//! stream, diffs each watcher event against that cache and fans the result out to the
//! registered [`ResourceEventHandler`]s.

mod initial_sync;
pub mod store;

pub use self::initial_sync::InitialSync;
use self::store::{Cache, Change};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use kube::runtime::{reflector::Lookup, watcher};
use parking_lot::RwLock;
use std::{hash::Hash, pin::pin, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

/// Receives the change narrative for objects of kind `K`
///
/// Implementations are called from the informer's task and must not block.
pub trait ResourceEventHandler<K>: Send + Sync {
    /// An object was seen for the first time, including every object of the initial list
    fn on_add(&self, obj: &K);
    /// An already-seen object changed
    fn on_update(&self, old: &K, new: &K);
    /// An object was removed upstream
    fn on_delete(&self, obj: &K);
}

/// A reliable source of change notifications plus an initial-synchronization signal
#[async_trait]
pub trait ChangeStream<K>: Send + Sync {
    /// Subscribe `handler` to every subsequent notification
    fn add_event_handler(&self, handler: Arc<dyn ResourceEventHandler<K>>);

    /// Wait for the initial listing to be merged into the cache
    ///
    /// Returns `false` if `cancel` fires first.
    async fn wait_for_initial_sync(&self, cancel: &CancellationToken) -> bool;
}

/// In-memory cache and callback dispatcher fed by a watcher stream
///
/// Cloning produces a new handle to the same cache, handlers and readiness.
pub struct Informer<K>
where
    K: Lookup + 'static,
    K::DynamicType: Eq + Hash,
{
    cache: Arc<Cache<K>>,
    handlers: Arc<RwLock<Vec<Arc<dyn ResourceEventHandler<K>>>>>,
    sync: Arc<InitialSync>,
}

impl<K> Clone for Informer<K>
where
    K: Lookup + 'static,
    K::DynamicType: Eq + Hash,
{
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            handlers: self.handlers.clone(),
            sync: self.sync.clone(),
        }
    }
}

impl<K> Default for Informer<K>
where
    K: Lookup + 'static,
    K::DynamicType: Eq + Hash,
{
    fn default() -> Self {
        Self {
            cache: Arc::default(),
            handlers: Arc::default(),
            sync: Arc::default(),
        }
    }
}

impl<K> Informer<K>
where
    K: Lookup + Clone + Send + Sync + 'static,
    K::DynamicType: Eq + Hash + Clone + Default,
{
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Read access to the cached objects
    #[must_use]
    pub fn cache(&self) -> &Cache<K> {
        &self.cache
    }

    #[must_use]
    pub fn has_synced(&self) -> bool {
        self.sync.is_complete()
    }

    /// Number of objects in the initial list, once it has been merged
    #[must_use]
    pub fn initial_list_size(&self) -> Option<usize> {
        self.sync.listed()
    }

    /// Applies a single watcher event and notifies the handlers of the resulting changes
    ///
    /// The first `InitDone` marks the informer as synchronized.
    pub fn apply_watcher_event(&self, event: &watcher::Event<K>) {
        let changes = self.cache.apply_watcher_event(event);
        if !changes.is_empty() {
            let handlers = self.handlers.read().clone();
            for change in &changes {
                for handler in &handlers {
                    match change {
                        Change::Added(obj) => handler.on_add(obj),
                        Change::Updated { old, new } => handler.on_update(old, new),
                        Change::Deleted(obj) => handler.on_delete(obj),
                    }
                }
            }
        }
        if matches!(event, watcher::Event::InitDone) {
            let objects = self.cache.len();
            if self.sync.complete(objects) {
                debug!(objects, "initial list synchronized");
            }
        }
    }

    /// Drive the informer from a watcher stream until the stream ends
    ///
    /// Errors are logged and skipped; recovering the watch is the stream's job,
    /// see [`WatchStreamExt::default_backoff`](kube::runtime::WatchStreamExt::default_backoff).
    pub async fn run<S>(&self, stream: S)
    where
        S: Stream<Item = watcher::Result<watcher::Event<K>>>,
    {
        let mut stream = pin!(stream);
        while let Some(event) = stream.next().await {
            match event {
                Ok(ev) => self.apply_watcher_event(&ev),
                Err(err) => warn!(error = %err, "watch stream failed"),
            }
        }
        trace!("watch stream ended");
    }

    /// Like [`run`](Self::run), but stops once `shutdown` is cancelled
    ///
    /// A stream that ends on its own leaves nothing to route, so it cancels `shutdown`
    /// and returns `false`.
    pub async fn run_until<S>(&self, stream: S, shutdown: &CancellationToken) -> bool
    where
        S: Stream<Item = watcher::Result<watcher::Event<K>>>,
    {
        tokio::select! {
            () = self.run(stream) => {
                error!("watch stream ended unexpectedly");
                shutdown.cancel();
                false
            }
            () = shutdown.cancelled() => true,
        }
    }
}

#[async_trait]
impl<K> ChangeStream<K> for Informer<K>
where
    K: Lookup + Clone + Send + Sync + 'static,
    K::DynamicType: Eq + Hash + Clone + Default + Send + Sync,
{
    fn add_event_handler(&self, handler: Arc<dyn ResourceEventHandler<K>>) {
        self.handlers.write().push(handler);
    }

    async fn wait_for_initial_sync(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            _ = self.sync.wait() => true,
            () = cancel.cancelled() => self.sync.is_complete(),
        }
    }
}

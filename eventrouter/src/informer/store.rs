use ahash::{AHashMap, AHashSet};
use kube::runtime::{
    reflector::{Lookup, ObjectRef},
    watcher,
};
use parking_lot::Mutex;
use std::{hash::Hash, sync::Arc};

/// A diff produced by applying one watcher event to the [`Cache`]
#[derive(Debug)]
pub enum Change<K> {
    Added(Arc<K>),
    Updated { old: Arc<K>, new: Arc<K> },
    Deleted(Arc<K>),
}

struct State<K>
where
    K: Lookup + 'static,
    K::DynamicType: Eq + Hash,
{
    objects: AHashMap<ObjectRef<K>, Arc<K>>,
    /// Keys seen since the last `Init`, while a (re)list is in progress
    relisted: Option<AHashSet<ObjectRef<K>>>,
}

/// Last-seen state of every watched object
///
/// Unlike a reflector store, applying an event yields the diff against the previous
/// state, which is what drives the add/update/delete callbacks.
pub struct Cache<K>
where
    K: Lookup + 'static,
    K::DynamicType: Eq + Hash,
{
    state: Mutex<State<K>>,
}

impl<K> Default for Cache<K>
where
    K: Lookup + 'static,
    K::DynamicType: Eq + Hash,
{
    fn default() -> Self {
        Self {
            state: Mutex::new(State {
                objects: AHashMap::new(),
                relisted: None,
            }),
        }
    }
}

impl<K> Cache<K>
where
    K: Lookup + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone + Default,
{
    /// Applies a single watcher event, returning the changes it implies
    pub fn apply_watcher_event(&self, event: &watcher::Event<K>) -> Vec<Change<K>> {
        let mut state = self.state.lock();
        match event {
            watcher::Event::Apply(obj) => vec![Self::upsert(&mut state.objects, obj)],
            watcher::Event::Delete(obj) => {
                let key = ObjectRef::from_obj(obj);
                if let Some(set) = state.relisted.as_mut() {
                    set.remove(&key);
                }
                state.objects.remove(&key);
                vec![Change::Deleted(Arc::new(obj.clone()))]
            }
            watcher::Event::Init => {
                state.relisted = Some(AHashSet::new());
                Vec::new()
            }
            watcher::Event::InitApply(obj) => {
                let key = ObjectRef::from_obj(obj);
                state.relisted.get_or_insert_with(AHashSet::new).insert(key);
                vec![Self::upsert(&mut state.objects, obj)]
            }
            watcher::Event::InitDone => {
                let Some(relisted) = state.relisted.take() else {
                    return Vec::new();
                };
                // Anything the relist did not mention went away while we were not watching
                let gone = state
                    .objects
                    .keys()
                    .filter(|key| !relisted.contains(*key))
                    .cloned()
                    .collect::<Vec<_>>();
                gone.into_iter()
                    .filter_map(|key| state.objects.remove(&key))
                    .map(Change::Deleted)
                    .collect()
            }
        }
    }

    fn upsert(objects: &mut AHashMap<ObjectRef<K>, Arc<K>>, obj: &K) -> Change<K> {
        let new = Arc::new(obj.clone());
        match objects.insert(ObjectRef::from_obj(obj), new.clone()) {
            Some(old) => Change::Updated { old, new },
            None => Change::Added(new),
        }
    }

    /// Retrieve the cached object referred to by `key`
    #[must_use]
    pub fn get(&self, key: &ObjectRef<K>) -> Option<Arc<K>> {
        self.state.lock().objects.get(key).cloned()
    }

    /// Return a full snapshot of the current values
    #[must_use]
    pub fn state(&self) -> Vec<Arc<K>> {
        self.state.lock().objects.values().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().objects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

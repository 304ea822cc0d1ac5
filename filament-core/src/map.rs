//! Keyed Reactive Collection
//!
//! [`ReactiveMap`] is a hand-written interception wrapper over an ordered
//! map, plugged into the engine through the `track`/`trigger` contract. Each
//! operation touches exactly the synthetic keys its semantics call for:
//!
//! - Inserting a brand-new key changes the key set, so it triggers the
//!   element key, size, the element's existence key, and every enumeration
//!   key.
//! - Overwriting an existing key with a different value leaves the key set
//!   alone: only the element key plus values/entries/iteration fire, not
//!   existence or keys-enumeration.
//! - Overwriting with an equal value triggers nothing.
//! - Removing fires like an insert of a brand-new key; removing an absent
//!   key is a no-op, as is clearing an empty map.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};

use crate::key::{EntityId, Key, KeyInterner, KeyToken};
use crate::runtime::Runtime;

/// An observed key-value collection.
pub struct ReactiveMap<K, V> {
    runtime: Runtime,
    entity: EntityId,
    entries: Arc<RwLock<IndexMap<K, V>>>,
    tokens: Arc<Mutex<KeyInterner<K>>>,
}

impl<K, V> Clone for ReactiveMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            runtime: self.runtime.clone(),
            entity: self.entity,
            entries: Arc::clone(&self.entries),
            tokens: Arc::clone(&self.tokens),
        }
    }
}

impl<K, V> ReactiveMap<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + PartialEq + Send + Sync + 'static,
{
    pub(crate) fn new(runtime: &Runtime) -> Self {
        Self {
            runtime: runtime.clone(),
            entity: EntityId::new(),
            entries: Arc::new(RwLock::new(IndexMap::new())),
            tokens: Arc::new(Mutex::new(KeyInterner::new())),
        }
    }

    /// The map's entity id, as it appears in registry snapshots.
    pub fn entity(&self) -> EntityId {
        self.entity
    }

    fn token(&self, key: &K) -> KeyToken {
        self.tokens.lock().intern(key)
    }

    fn trigger_enumerations(&self, key_set_changed: bool) {
        if key_set_changed {
            self.runtime.trigger(self.entity, Key::Keys);
        }
        self.runtime.trigger(self.entity, Key::Values);
        self.runtime.trigger(self.entity, Key::Entries);
        self.runtime.trigger(self.entity, Key::Iteration);
    }

    /// Read one element. Subscribes the active computation to that element.
    pub fn get(&self, key: &K) -> Option<V> {
        let tok = self.token(key);
        self.runtime.track(self.entity, Key::Element(tok));
        self.entries.read().get(key).cloned()
    }

    /// Read one element without establishing a dependency.
    pub fn get_untracked(&self, key: &K) -> Option<V> {
        self.entries.read().get(key).cloned()
    }

    /// Insert or overwrite an element, triggering per the key-set rules
    /// above. Returns the previous value, if any.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let tok = self.token(&key);
        let previous = self.entries.read().get(&key).cloned();
        match previous {
            None => {
                self.entries.write().insert(key, value);
                self.runtime.trigger(self.entity, Key::Element(tok));
                self.runtime.trigger(self.entity, Key::Size);
                self.runtime.trigger(self.entity, Key::Existence(tok));
                self.trigger_enumerations(true);
                None
            }
            Some(old) if old != value => {
                self.entries.write().insert(key, value);
                self.runtime.trigger(self.entity, Key::Element(tok));
                self.trigger_enumerations(false);
                Some(old)
            }
            unchanged => unchanged,
        }
    }

    /// Remove an element. No-op (and no triggers) when the key is absent.
    pub fn remove(&self, key: &K) -> Option<V> {
        let removed = self.entries.write().shift_remove(key);
        if removed.is_some() {
            let tok = self.token(key);
            self.runtime.trigger(self.entity, Key::Element(tok));
            self.runtime.trigger(self.entity, Key::Size);
            self.runtime.trigger(self.entity, Key::Existence(tok));
            self.trigger_enumerations(true);
        }
        removed
    }

    /// Remove every element. No-op when already empty.
    pub fn clear(&self) {
        let drained: Vec<K> = {
            let mut entries = self.entries.write();
            if entries.is_empty() {
                return;
            }
            entries.drain(..).map(|(k, _)| k).collect()
        };
        for key in &drained {
            let tok = self.token(key);
            self.runtime.trigger(self.entity, Key::Element(tok));
            self.runtime.trigger(self.entity, Key::Existence(tok));
        }
        self.runtime.trigger(self.entity, Key::Size);
        self.trigger_enumerations(true);
    }

    /// Membership test. Subscribes to the element's existence key, so only
    /// appearance or disappearance of the key re-runs the subscriber.
    pub fn contains_key(&self, key: &K) -> bool {
        let tok = self.token(key);
        self.runtime.track(self.entity, Key::Existence(tok));
        self.entries.read().contains_key(key)
    }

    /// Element count. Subscribes to the size key.
    pub fn len(&self) -> usize {
        self.runtime.track(self.entity, Key::Size);
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.runtime.track(self.entity, Key::Size);
        self.entries.read().is_empty()
    }

    /// Snapshot of the keys, in insertion order. Subscribes to the
    /// keys-enumeration key.
    pub fn keys(&self) -> Vec<K> {
        self.runtime.track(self.entity, Key::Keys);
        self.entries.read().keys().cloned().collect()
    }

    /// Snapshot of the values, in insertion order. Subscribes to the
    /// values-enumeration key.
    pub fn values(&self) -> Vec<V> {
        self.runtime.track(self.entity, Key::Values);
        self.entries.read().values().cloned().collect()
    }

    /// Snapshot of the entries, in insertion order. Subscribes to the
    /// entries-enumeration key.
    pub fn entries(&self) -> Vec<(K, V)> {
        self.runtime.track(self.entity, Key::Entries);
        self.entries
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Visit every entry. Subscribes to the full-iteration key. The
    /// traversal runs over a snapshot, so `f` may freely read the map.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&K, &V),
    {
        self.runtime.track(self.entity, Key::Iteration);
        let snapshot = self.entries();
        for (key, value) in &snapshot {
            f(key, value);
        }
    }
}

impl<K, V> fmt::Debug for ReactiveMap<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + fmt::Debug + 'static,
    V: Clone + PartialEq + Send + Sync + fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveMap")
            .field("entity", &self.entity)
            .field("entries", &*self.entries.read())
            .finish()
    }
}

impl Runtime {
    /// Create an empty reactive map.
    pub fn map<K, V>(&self) -> ReactiveMap<K, V>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Clone + PartialEq + Send + Sync + 'static,
    {
        ReactiveMap::new(self)
    }
}

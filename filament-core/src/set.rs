//! Set-like Reactive Collection
//!
//! [`ReactiveSet`] observes membership rather than key-value pairs. Every
//! structural change (insert of a new element, remove, clear) changes the
//! element set, so it fires the element key, size, the existence key, and
//! every enumeration key; inserting an element that is already present
//! triggers nothing.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use indexmap::IndexSet;
use parking_lot::{Mutex, RwLock};

use crate::key::{EntityId, Key, KeyInterner, KeyToken};
use crate::runtime::Runtime;

/// An observed set of values.
pub struct ReactiveSet<T> {
    runtime: Runtime,
    entity: EntityId,
    entries: Arc<RwLock<IndexSet<T>>>,
    tokens: Arc<Mutex<KeyInterner<T>>>,
}

impl<T> Clone for ReactiveSet<T> {
    fn clone(&self) -> Self {
        Self {
            runtime: self.runtime.clone(),
            entity: self.entity,
            entries: Arc::clone(&self.entries),
            tokens: Arc::clone(&self.tokens),
        }
    }
}

impl<T> ReactiveSet<T>
where
    T: Eq + Hash + Clone + Send + Sync + 'static,
{
    pub(crate) fn new(runtime: &Runtime) -> Self {
        Self {
            runtime: runtime.clone(),
            entity: EntityId::new(),
            entries: Arc::new(RwLock::new(IndexSet::new())),
            tokens: Arc::new(Mutex::new(KeyInterner::new())),
        }
    }

    /// The set's entity id, as it appears in registry snapshots.
    pub fn entity(&self) -> EntityId {
        self.entity
    }

    fn token(&self, value: &T) -> KeyToken {
        self.tokens.lock().intern(value)
    }

    fn trigger_membership_change(&self, tok: KeyToken) {
        self.runtime.trigger(self.entity, Key::Element(tok));
        self.runtime.trigger(self.entity, Key::Size);
        self.runtime.trigger(self.entity, Key::Existence(tok));
        self.runtime.trigger(self.entity, Key::Keys);
        self.runtime.trigger(self.entity, Key::Values);
        self.runtime.trigger(self.entity, Key::Entries);
        self.runtime.trigger(self.entity, Key::Iteration);
    }

    /// Insert a value. Triggers only when the value was not already present.
    /// Returns whether the set changed.
    pub fn insert(&self, value: T) -> bool {
        let tok = self.token(&value);
        let inserted = self.entries.write().insert(value);
        if inserted {
            self.trigger_membership_change(tok);
        }
        inserted
    }

    /// Remove a value. No-op (and no triggers) when absent. Returns whether
    /// the set changed.
    pub fn remove(&self, value: &T) -> bool {
        let removed = self.entries.write().shift_remove(value);
        if removed {
            let tok = self.token(value);
            self.trigger_membership_change(tok);
        }
        removed
    }

    /// Remove every value. No-op when already empty.
    pub fn clear(&self) {
        let drained: Vec<T> = {
            let mut entries = self.entries.write();
            if entries.is_empty() {
                return;
            }
            entries.drain(..).collect()
        };
        for value in &drained {
            let tok = self.token(value);
            self.runtime.trigger(self.entity, Key::Element(tok));
            self.runtime.trigger(self.entity, Key::Existence(tok));
        }
        self.runtime.trigger(self.entity, Key::Size);
        self.runtime.trigger(self.entity, Key::Keys);
        self.runtime.trigger(self.entity, Key::Values);
        self.runtime.trigger(self.entity, Key::Entries);
        self.runtime.trigger(self.entity, Key::Iteration);
    }

    /// Membership test. Subscribes to the value's existence key.
    pub fn contains(&self, value: &T) -> bool {
        let tok = self.token(value);
        self.runtime.track(self.entity, Key::Existence(tok));
        self.entries.read().contains(value)
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

    /// Snapshot of the values, in insertion order. Subscribes to the
    /// values-enumeration key.
    pub fn values(&self) -> Vec<T> {
        self.runtime.track(self.entity, Key::Values);
        self.entries.read().iter().cloned().collect()
    }

    /// Visit every value. Subscribes to the full-iteration key.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&T),
    {
        self.runtime.track(self.entity, Key::Iteration);
        let snapshot: Vec<T> = self.entries.read().iter().cloned().collect();
        for value in &snapshot {
            f(value);
        }
    }
}

impl<T> fmt::Debug for ReactiveSet<T>
where
    T: Eq + Hash + Clone + Send + Sync + fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveSet")
            .field("entity", &self.entity)
            .field("entries", &*self.entries.read())
            .finish()
    }
}

impl Runtime {
    /// Create an empty reactive set.
    pub fn set<T>(&self) -> ReactiveSet<T>
    where
        T: Eq + Hash + Clone + Send + Sync + 'static,
    {
        ReactiveSet::new(self)
    }
}

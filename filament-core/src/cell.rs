//! Reactive Value Cells
//!
//! A [`ReactiveCell`] is a single-slot container participating in tracking
//! under [`Key::Value`]: reads subscribe the active computation, writes that
//! change the value trigger its subscribers. Writing an equal value triggers
//! nothing.
//!
//! A cell can carry a write-intercept hook deciding whether a write is
//! applied. Two users: read-only cells ([`Runtime::readonly_cell`]) reject
//! every write, and computed result cells permit only their own derivation's
//! write-back.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use crate::key::{EntityId, Key};
use crate::runtime::Runtime;

type SetHook<T> = Arc<dyn Fn(&T, &T) -> bool + Send + Sync>;

/// A single observed value slot.
pub struct ReactiveCell<T> {
    runtime: Runtime,
    entity: EntityId,
    value: Arc<RwLock<T>>,
    on_set: Option<SetHook<T>>,
}

impl<T> Clone for ReactiveCell<T> {
    fn clone(&self) -> Self {
        Self {
            runtime: self.runtime.clone(),
            entity: self.entity,
            value: Arc::clone(&self.value),
            on_set: self.on_set.clone(),
        }
    }
}

impl<T> ReactiveCell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub(crate) fn new(runtime: &Runtime, value: T) -> Self {
        Self {
            runtime: runtime.clone(),
            entity: EntityId::new(),
            value: Arc::new(RwLock::new(value)),
            on_set: None,
        }
    }

    pub(crate) fn with_set_hook<H>(runtime: &Runtime, value: T, hook: H) -> Self
    where
        H: Fn(&T, &T) -> bool + Send + Sync + 'static,
    {
        Self {
            on_set: Some(Arc::new(hook)),
            ..Self::new(runtime, value)
        }
    }

    /// The cell's entity id, as it appears in registry snapshots.
    pub fn entity(&self) -> EntityId {
        self.entity
    }

    /// Read the current value. Subscribes the active computation, if any.
    pub fn get(&self) -> T {
        self.runtime.track(self.entity, Key::Value);
        self.value.read().clone()
    }

    /// Read the current value without establishing a dependency.
    pub fn get_untracked(&self) -> T {
        self.value.read().clone()
    }

    /// Write a new value and trigger subscribers if it differs from the
    /// current one.
    ///
    /// When a write-intercept hook is installed and rejects the write, the
    /// value is left unchanged and nothing is triggered.
    pub fn set(&self, new_value: T) {
        if let Some(hook) = &self.on_set {
            let current = self.value.read().clone();
            if !hook(&current, &new_value) {
                return;
            }
        }

        let changed = {
            let mut guard = self.value.write();
            if *guard == new_value {
                false
            } else {
                *guard = new_value;
                true
            }
        };
        if changed {
            self.runtime.trigger(self.entity, Key::Value);
        }
    }

    /// Write a value computed from the current one.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&T) -> T,
    {
        let current = self.get_untracked();
        self.set(f(&current));
    }
}

impl<T> fmt::Debug for ReactiveCell<T>
where
    T: Clone + PartialEq + Send + Sync + fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReactiveCell")
            .field("entity", &self.entity)
            .field("value", &self.get_untracked())
            .finish()
    }
}

impl Runtime {
    /// Create a reactive value cell.
    pub fn cell<T>(&self, value: T) -> ReactiveCell<T>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        ReactiveCell::new(self, value)
    }

    /// Create a read-only cell: reads are tracked like any other cell, but
    /// every write is silently rejected, with a diagnostic in debug builds.
    pub fn readonly_cell<T>(&self, value: T) -> ReactiveCell<T>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
    {
        ReactiveCell::with_set_hook(self, value, |_current, _new| {
            if cfg!(debug_assertions) {
                warn!("ignoring write to a read-only value");
            }
            false
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[test]
    fn cell_get_and_set() {
        let rt = Runtime::new();
        let cell = rt.cell(0);
        assert_eq!(cell.get(), 0);

        cell.set(42);
        assert_eq!(cell.get(), 42);
    }

    #[test]
    fn cell_update() {
        let rt = Runtime::new();
        let cell = rt.cell(10);
        cell.update(|v| v + 5);
        assert_eq!(cell.get(), 15);
    }

    #[test]
    fn writing_an_equal_value_triggers_nothing() {
        let rt = Runtime::new();
        let cell = rt.cell(7);
        let runs = Arc::new(AtomicI32::new(0));

        let runs_in_effect = runs.clone();
        let cell_in_effect = cell.clone();
        rt.effect(move || {
            let _ = cell_in_effect.get();
            runs_in_effect.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        cell.set(7);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        cell.set(8);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn readonly_cell_rejects_writes() {
        let rt = Runtime::new();
        let cell = rt.readonly_cell(1);
        let runs = Arc::new(AtomicI32::new(0));

        let runs_in_effect = runs.clone();
        let cell_in_effect = cell.clone();
        rt.effect(move || {
            let _ = cell_in_effect.get();
            runs_in_effect.fetch_add(1, Ordering::SeqCst);
        });

        cell.set(2);
        assert_eq!(cell.get_untracked(), 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clones_share_the_slot() {
        let rt = Runtime::new();
        let a = rt.cell(0);
        let b = a.clone();

        a.set(42);
        assert_eq!(b.get_untracked(), 42);
        assert_eq!(a.entity(), b.entity());
    }
}

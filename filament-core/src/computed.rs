//! Computed Derivations
//!
//! A [`Computed`] pairs a pure derivation function with a result cell. The
//! derivation is registered as a computation like any effect, but with a
//! schedule hook that defers re-evaluation until the value is actually
//! needed:
//!
//! 1. Reading the result cell is itself tracked, so a computed can be a
//!    dependency of effects and of other computeds.
//!
//! 2. Evaluation is lazy. The derivation first runs on the first read, and
//!    after invalidation it re-runs on the next read — except when the
//!    computed has ever been read under an effect's tracking context, in
//!    which case invalidation re-evaluates immediately so downstream
//!    subscribers observe a consistent chain.
//!
//! 3. The write-back of a freshly derived value goes through the result
//!    cell's ordinary `set`, which is what propagates the change to the
//!    computed's own subscribers. An unchanged value writes nothing and so
//!    propagates nothing.
//!
//! Dirtiness cascades through the runtime's computed-dependents graph: when
//! an upstream slot triggers a computed, every computed downstream of it is
//! marked dirty in the same pass, then re-evaluated lazily or eagerly per
//! rule 2.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;

use crate::cell::ReactiveCell;
use crate::context::SubscriberId;
use crate::effect::Rerun;
use crate::runtime::{Computation, Runtime};

/// Lifecycle of a computed's result cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputedState {
    /// The cache cannot be trusted; the derivation must re-run before the
    /// next value is handed out.
    Dirty,
    /// The derivation is running and writing back its result. Reads during
    /// this window return the cache, and the internal write is permitted.
    Evaluating,
    /// An upstream change arrived while the derivation was writing back.
    Redirtied,
    /// The cache is current.
    Clean,
}

/// Shared dirty-state slot, consulted by the runtime's dirty cascade.
pub(crate) struct StateSlot {
    state: Mutex<ComputedState>,
}

impl StateSlot {
    fn new() -> Self {
        Self {
            state: Mutex::new(ComputedState::Dirty),
        }
    }

    pub(crate) fn get(&self) -> ComputedState {
        *self.state.lock()
    }

    /// Invalidate. Idempotent; an in-flight evaluation is recorded as
    /// re-dirtied rather than losing its self-read shield.
    pub(crate) fn mark_dirty(&self) {
        let mut state = self.state.lock();
        *state = match *state {
            ComputedState::Evaluating | ComputedState::Redirtied => ComputedState::Redirtied,
            _ => ComputedState::Dirty,
        };
    }

    /// Claim the slot for evaluation. Returns false when there is nothing to
    /// do (already clean, or an evaluation is in flight).
    fn begin_evaluation(&self) -> bool {
        let mut state = self.state.lock();
        if *state == ComputedState::Dirty {
            *state = ComputedState::Evaluating;
            true
        } else {
            false
        }
    }

    /// Close out an evaluation. The slot goes clean only when the derived
    /// value actually changed and no invalidation arrived mid-write;
    /// otherwise it stays dirty so the next read re-derives.
    fn settle(&self, changed: bool) {
        let mut state = self.state.lock();
        *state = match (*state, changed) {
            (ComputedState::Evaluating, true) => ComputedState::Clean,
            _ => ComputedState::Dirty,
        };
    }

    fn write_permitted(&self) -> bool {
        matches!(
            self.get(),
            ComputedState::Evaluating | ComputedState::Redirtied
        )
    }
}

/// A memoized derivation with a reactive result cell.
pub struct Computed<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    runtime: Runtime,
    cell: ReactiveCell<Option<T>>,
    slot: Arc<StateSlot>,
    update_id: SubscriberId,

    /// Whether the derivation has been evaluated at least once.
    registered: Arc<AtomicBool>,

    /// Set once the computed has been read inside a tracking context rooted
    /// at a non-computed computation. From then on, invalidations evaluate
    /// eagerly instead of waiting for the next read.
    read_under_effect: Arc<AtomicBool>,

    /// Re-subscribing wrapper stored by the schedule hook, invoked by the
    /// next read when evaluation was deferred.
    runner: Arc<Mutex<Option<Rerun>>>,
}

impl<T> Clone for Computed<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            runtime: self.runtime.clone(),
            cell: self.cell.clone(),
            slot: Arc::clone(&self.slot),
            update_id: self.update_id,
            registered: Arc::clone(&self.registered),
            read_under_effect: Arc::clone(&self.read_under_effect),
            runner: Arc::clone(&self.runner),
        }
    }
}

impl<T> Computed<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    pub(crate) fn new<F>(runtime: &Runtime, derive: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let slot = Arc::new(StateSlot::new());

        // The result cell permits writes only during the derivation's own
        // write-back window; anything else is rejected unchanged.
        let cell = {
            let permit = Arc::clone(&slot);
            ReactiveCell::with_set_hook(runtime, None, move |_current, _new: &Option<T>| {
                if permit.write_permitted() {
                    true
                } else {
                    if cfg!(debug_assertions) {
                        warn!("ignoring write to a computed value");
                    }
                    false
                }
            })
        };

        let update_id = SubscriberId::new();

        let update: Arc<dyn Fn() + Send + Sync> = {
            let slot = Arc::clone(&slot);
            let cell = cell.clone();
            Arc::new(move || {
                if !slot.begin_evaluation() {
                    return;
                }
                let new_value = derive();
                let changed = cell.get_untracked().as_ref() != Some(&new_value);
                if changed {
                    // Triggers the computed's own subscribers. Reads made by
                    // those subscribers during the trigger see the fresh
                    // cache through the evaluation shield.
                    cell.set(Some(new_value));
                }
                slot.settle(changed);
            })
        };

        let read_under_effect = Arc::new(AtomicBool::new(false));
        let runner = Arc::new(Mutex::new(None));
        let schedule = {
            let read_under_effect = Arc::clone(&read_under_effect);
            let runner = Arc::clone(&runner);
            Arc::new(move |rerun: Rerun| {
                *runner.lock() = Some(rerun.clone());
                if read_under_effect.load(Ordering::Relaxed) {
                    rerun.run();
                }
            })
        };

        runtime.insert_computation(
            update_id,
            Computation::computed(update, schedule, Arc::clone(&slot)),
        );

        Self {
            runtime: runtime.clone(),
            cell,
            slot,
            update_id,
            registered: Arc::new(AtomicBool::new(false)),
            read_under_effect,
            runner,
        }
    }

    /// Read the current value, evaluating the derivation first if the cache
    /// is stale. The read subscribes the active computation, if any, to the
    /// result cell.
    pub fn get(&self) -> T {
        self.ensure_current();
        self.cell.get().expect("evaluated computed holds a value")
    }

    /// The current lifecycle state.
    pub fn state(&self) -> ComputedState {
        self.slot.get()
    }

    /// Whether the derivation has produced a value yet.
    pub fn has_value(&self) -> bool {
        self.cell.get_untracked().is_some()
    }

    /// The result cell's entity id, as it appears in registry snapshots.
    pub fn entity(&self) -> crate::key::EntityId {
        self.cell.entity()
    }

    fn ensure_current(&self) {
        match self.slot.get() {
            // Reads during write-back return the cache unconditionally.
            ComputedState::Clean | ComputedState::Evaluating | ComputedState::Redirtied => return,
            ComputedState::Dirty => {}
        }

        if !self.read_under_effect.load(Ordering::Relaxed) {
            if let Some(root) = self.runtime.stack_root() {
                if !root.is_computed {
                    self.read_under_effect.store(true, Ordering::Relaxed);
                }
            }
        }

        let was_registered = self.registered.swap(true, Ordering::Relaxed);
        if self.read_under_effect.load(Ordering::Relaxed) || !was_registered {
            Rerun::new(self.runtime.clone(), self.update_id).run();
        } else {
            // Deferred invalidation: the schedule hook left the wrapper for
            // us. A dirty slot with no stored wrapper means an upstream
            // computed re-derived to an unchanged value, so the cache is
            // still valid.
            let pending = self.runner.lock().take();
            if let Some(rerun) = pending {
                rerun.run();
            }
        }
    }
}

impl<T> fmt::Debug for Computed<T>
where
    T: Clone + PartialEq + Send + Sync + fmt::Debug + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computed")
            .field("state", &self.state())
            .field("has_value", &self.has_value())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn computed_is_lazy() {
        let rt = Runtime::new();
        let cell = rt.cell(1);
        let derivations = Arc::new(AtomicI32::new(0));

        let derivations_in_derive = derivations.clone();
        let cell_in_derive = cell.clone();
        let doubled = rt.computed(move || {
            derivations_in_derive.fetch_add(1, Ordering::SeqCst);
            cell_in_derive.get() * 2
        });

        // Upstream churn before the first read runs nothing.
        cell.set(2);
        cell.set(3);
        assert_eq!(derivations.load(Ordering::SeqCst), 0);
        assert!(!doubled.has_value());

        assert_eq!(doubled.get(), 6);
        assert_eq!(derivations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn computed_memoizes() {
        let rt = Runtime::new();
        let derivations = Arc::new(AtomicI32::new(0));

        let derivations_in_derive = derivations.clone();
        let c = rt.computed(move || {
            derivations_in_derive.fetch_add(1, Ordering::SeqCst);
            42
        });

        assert_eq!(c.get(), 42);
        assert_eq!(c.get(), 42);
        assert_eq!(c.get(), 42);
        assert_eq!(derivations.load(Ordering::SeqCst), 1);
        assert_eq!(c.state(), ComputedState::Clean);
    }

    #[test]
    fn dirty_computed_reevaluates_on_next_read() {
        let rt = Runtime::new();
        let cell = rt.cell(10);
        let derivations = Arc::new(AtomicI32::new(0));

        let derivations_in_derive = derivations.clone();
        let cell_in_derive = cell.clone();
        let c = rt.computed(move || {
            derivations_in_derive.fetch_add(1, Ordering::SeqCst);
            cell_in_derive.get() + 1
        });

        assert_eq!(c.get(), 11);
        assert_eq!(derivations.load(Ordering::SeqCst), 1);

        // Read outside any effect, so the invalidation defers: the change
        // marks the computed dirty but does not re-derive yet.
        cell.set(20);
        assert_eq!(derivations.load(Ordering::SeqCst), 1);
        assert_eq!(c.state(), ComputedState::Dirty);

        assert_eq!(c.get(), 21);
        assert_eq!(derivations.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unchanged_derivation_does_not_propagate() {
        let rt = Runtime::new();
        let cell = rt.cell(2);
        let runs = Arc::new(AtomicI32::new(0));

        let cell_in_derive = cell.clone();
        let parity = rt.computed(move || cell_in_derive.get() % 2);

        let runs_in_effect = runs.clone();
        let parity_in_effect = parity.clone();
        rt.effect(move || {
            let _ = parity_in_effect.get();
            runs_in_effect.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        // 2 -> 4 keeps the parity; the computed re-derives but its
        // subscribers stay quiet.
        cell.set(4);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        cell.set(5);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn external_writes_to_the_result_cell_are_rejected() {
        let rt = Runtime::new();
        let cell = rt.cell(1);

        let cell_in_derive = cell.clone();
        let c = rt.computed(move || cell_in_derive.get() * 10);
        assert_eq!(c.get(), 10);

        // Direct write to the private result cell: the permit hook rejects
        // it because no evaluation is in flight.
        c.cell.set(Some(999));
        assert_eq!(c.get(), 10);
        assert_eq!(c.state(), ComputedState::Clean);
    }

    #[test]
    fn state_transitions() {
        let rt = Runtime::new();
        let cell = rt.cell(1);

        let cell_in_derive = cell.clone();
        let c = rt.computed(move || cell_in_derive.get());
        assert_eq!(c.state(), ComputedState::Dirty);

        assert_eq!(c.get(), 1);
        assert_eq!(c.state(), ComputedState::Clean);

        cell.set(2);
        assert_eq!(c.state(), ComputedState::Dirty);

        assert_eq!(c.get(), 2);
        assert_eq!(c.state(), ComputedState::Clean);
    }

    #[test]
    fn computed_read_during_its_own_write_back_sees_the_fresh_cache() {
        let rt = Runtime::new();
        let cell = rt.cell(1);
        let seen = Arc::new(AtomicI32::new(0));

        let cell_in_derive = cell.clone();
        let c = rt.computed(move || cell_in_derive.get() * 10);

        // The effect reads the computed; the computed's write-back triggers
        // this effect re-entrantly while the slot is still evaluating.
        let seen_in_effect = seen.clone();
        let c_in_effect = c.clone();
        rt.effect(move || {
            seen_in_effect.store(c_in_effect.get(), Ordering::SeqCst);
        });
        assert_eq!(seen.load(Ordering::SeqCst), 10);

        cell.set(5);
        assert_eq!(seen.load(Ordering::SeqCst), 50);
        assert_eq!(c.state(), ComputedState::Clean);
    }
}

//! Effects
//!
//! An effect is a zero-argument computation with observable side effects.
//! Registration runs it once, eagerly, inside a fresh tracking frame so that
//! every slot it reads subscribes it; any later trigger on one of those
//! slots re-runs it, re-discovering the dependency set as it goes.
//!
//! The default re-invocation policy — run immediately, synchronously — can
//! be replaced per effect with [`EffectOptions::scheduled`]. The hook
//! receives a [`Rerun`] wrapper and decides whether and when to invoke it;
//! the watch layer and computed derivations are both built on this hook.

use std::fmt;
use std::sync::Arc;

use crate::context::{Frame, SubscriberId};
use crate::key::{EntityId, Key};
use crate::runtime::{Runtime, ScheduleFn};

/// Options accepted at effect registration time.
#[derive(Default)]
pub struct EffectOptions {
    /// Replaces the default "re-run immediately" policy. Invoked with a
    /// re-subscribing [`Rerun`] on every invalidation after the first run.
    pub schedule: Option<ScheduleFn>,
}

impl EffectOptions {
    /// Options with a schedule hook installed.
    pub fn scheduled<F>(hook: F) -> Self
    where
        F: Fn(Rerun) + Send + Sync + 'static,
    {
        Self {
            schedule: Some(Arc::new(hook)),
        }
    }
}

impl fmt::Debug for EffectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectOptions")
            .field("schedule", &self.schedule.is_some())
            .finish()
    }
}

/// Handle to a registered effect.
///
/// Dropping the handle does not unregister the effect; registered
/// computations live as long as their runtime.
#[derive(Clone)]
pub struct Effect {
    runtime: Runtime,
    id: SubscriberId,
}

impl Effect {
    pub(crate) fn new(runtime: Runtime, id: SubscriberId) -> Self {
        Self { runtime, id }
    }

    /// The effect's subscriber id, as it appears in registry snapshots.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Re-run the effect now, re-discovering its dependency set.
    pub fn rerun(&self) {
        Rerun::new(self.runtime.clone(), self.id).run();
    }
}

impl fmt::Debug for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Effect").field("id", &self.id).finish()
    }
}

/// Re-subscribing wrapper handed to schedule hooks.
///
/// Invoking [`Rerun::run`] unsubscribes the computation from every slot it
/// subscribed to during its previous run, pushes it onto the execution
/// stack, and runs it, so the subscription set always reflects the latest
/// run. A hook that never invokes its wrapper leaves the previous
/// subscriptions in place.
#[derive(Clone)]
pub struct Rerun {
    runtime: Runtime,
    id: SubscriberId,
}

impl Rerun {
    pub(crate) fn new(runtime: Runtime, id: SubscriberId) -> Self {
        Self { runtime, id }
    }

    /// The wrapped computation's subscriber id.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Run the wrapped computation inside a fresh tracking frame.
    ///
    /// Panics from the computation body propagate; the stack is popped on
    /// every exit path.
    pub fn run(&self) {
        let Some(comp) = self.runtime.computation(self.id) else {
            return;
        };

        // Unsubscribe before re-track: drop the slots recorded by the last
        // run so the registry does not grow with dependencies the new run no
        // longer reads.
        let stale: Vec<(EntityId, Key)> = {
            let mut deps = comp.deps.lock();
            std::mem::take(&mut *deps)
        };
        if !stale.is_empty() {
            let mut registry = self.runtime.inner.registry.write();
            for (entity, key) in stale {
                if let Some(keys) = registry.get_mut(&entity) {
                    if let Some(subscribers) = keys.get_mut(&key) {
                        subscribers.swap_remove(&self.id);
                    }
                }
            }
        }

        let _scope = self.runtime.inner.stack.enter(Frame {
            id: self.id,
            is_computed: comp.is_computed,
            tracking: true,
        });
        (comp.run)();
    }
}

impl fmt::Debug for Rerun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rerun").field("id", &self.id).finish()
    }
}

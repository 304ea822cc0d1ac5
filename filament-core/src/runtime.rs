//! Reactive Runtime
//!
//! The runtime owns the four shared structures of the engine:
//!
//! 1. The subscription registry, mapping `(entity, key)` slots to the set of
//!    computations subscribed to them.
//!
//! 2. The execution stack of currently-running computations.
//!
//! 3. The computed-dependents graph, a secondary edge set used solely to
//!    cascade dirtiness through chains of computed derivations.
//!
//! 4. The tracking-suppression flag consulted by [`Runtime::untracked`].
//!
//! plus the re-entrancy guard that silences triggers raised as a side effect
//! of an effect's very first synchronous run.
//!
//! A `Runtime` is a cheap clonable handle; independent runtimes (one per
//! test, say) share nothing. The execution model is a single logical thread
//! with re-entrancy only through ordinary recursion: `trigger` runs its
//! whole cascade before returning. Locks are never held across user code, so
//! recursive triggering cannot deadlock.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use smallvec::SmallVec;
use tracing::trace;

use crate::computed::{Computed, StateSlot};
use crate::context::{ExecutionStack, Frame, SubscriberId};
use crate::effect::{Effect, EffectOptions, Rerun};
use crate::error::ReactiveError;
use crate::key::{EntityId, Key};

pub(crate) type RunFn = Arc<dyn Fn() + Send + Sync>;
pub(crate) type ScheduleFn = Arc<dyn Fn(Rerun) + Send + Sync>;

/// A registered computation plus its bookkeeping.
#[derive(Clone)]
pub(crate) struct Computation {
    /// The computation body. Re-discovers its dependency set on every run.
    pub run: RunFn,

    /// Override for the default re-invocation policy. Installed at
    /// registration time, consulted on every trigger.
    pub schedule: Option<ScheduleFn>,

    /// Whether this computation is a computed derivation.
    pub is_computed: bool,

    /// Dirty-state slot, present only for computed derivations.
    pub state: Option<Arc<StateSlot>>,

    /// `(entity, key)` slots subscribed to during the last run. Drained and
    /// unsubscribed before each re-run so stale dependencies do not
    /// accumulate.
    pub deps: Arc<Mutex<Vec<(EntityId, Key)>>>,
}

impl Computation {
    pub(crate) fn new(run: RunFn, schedule: Option<ScheduleFn>) -> Self {
        Self {
            run,
            schedule,
            is_computed: false,
            state: None,
            deps: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn computed(run: RunFn, schedule: ScheduleFn, state: Arc<StateSlot>) -> Self {
        Self {
            run,
            schedule: Some(schedule),
            is_computed: true,
            state: Some(state),
            deps: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

pub(crate) struct RuntimeInner {
    /// entity -> key -> subscribers. Slots are created lazily and set
    /// membership guarantees a computation is never subscribed twice to the
    /// same slot.
    pub(crate) registry: RwLock<HashMap<EntityId, IndexMap<Key, IndexSet<SubscriberId>>>>,

    /// All registered computations.
    computations: RwLock<HashMap<SubscriberId, Computation>>,

    /// computed -> computeds that depend on it. Grows monotonically.
    computed_dependents: RwLock<HashMap<SubscriberId, IndexSet<SubscriberId>>>,

    pub(crate) stack: ExecutionStack,

    /// Runtime-wide tracking suppression, set by [`Runtime::untracked`].
    suppressed: AtomicBool,

    /// Set while a top-level effect runs its initial registration pass;
    /// triggers raised during that window are ignored.
    registering: AtomicBool,
}

/// The reactive runtime. Cloning yields another handle to the same engine.
#[derive(Clone)]
pub struct Runtime {
    pub(crate) inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Create a fresh, empty runtime.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RuntimeInner {
                registry: RwLock::new(HashMap::new()),
                computations: RwLock::new(HashMap::new()),
                computed_dependents: RwLock::new(HashMap::new()),
                stack: ExecutionStack::default(),
                suppressed: AtomicBool::new(false),
                registering: AtomicBool::new(false),
            }),
        }
    }

    // ------------------------------------------------------------------
    // Track / trigger primitives
    // ------------------------------------------------------------------

    /// Record the currently-active computation as a subscriber of
    /// `(entity, key)`.
    ///
    /// No-op when tracking is suppressed, no computation is active, or the
    /// active frame has tracking disabled. When the top two stack frames are
    /// both computed derivations, additionally records that the outer one
    /// depends on the inner one; that edge set drives the dirty cascade.
    pub fn track(&self, entity: EntityId, key: Key) {
        if self.inner.suppressed.load(Ordering::Relaxed) {
            return;
        }
        let Some(top) = self.inner.stack.top() else {
            return;
        };
        if !top.tracking {
            return;
        }

        trace!(entity = entity.raw(), key = %key, subscriber = top.id.raw(), "track");

        let inserted = {
            let mut registry = self.inner.registry.write();
            registry
                .entry(entity)
                .or_default()
                .entry(key)
                .or_default()
                .insert(top.id)
        };
        if inserted {
            if let Some(comp) = self.computation(top.id) {
                comp.deps.lock().push((entity, key));
            }
        }

        let (Some(top), Some(beneath)) = self.inner.stack.top_two() else {
            return;
        };
        if top.is_computed && beneath.is_computed {
            self.inner
                .computed_dependents
                .write()
                .entry(top.id)
                .or_default()
                .insert(beneath.id);
        }
    }

    /// Notify and re-run every subscriber of `(entity, key)`.
    ///
    /// For computed subscribers the dirty cascade runs first. Each
    /// subscriber then receives a fresh re-subscribing [`Rerun`] wrapper:
    /// handed to its schedule hook when one is installed, invoked
    /// immediately otherwise. Iteration order over subscribers is
    /// unspecified.
    ///
    /// Triggers raised during the initial registration run of a top-level
    /// effect are ignored; triggers raised during a re-run are not.
    pub fn trigger(&self, entity: EntityId, key: Key) {
        if self.inner.registering.load(Ordering::Relaxed) {
            return;
        }

        trace!(entity = entity.raw(), key = %key, "trigger");

        let subscribers: SmallVec<[SubscriberId; 8]> = {
            let mut registry = self.inner.registry.write();
            registry
                .entry(entity)
                .or_default()
                .entry(key)
                .or_default()
                .iter()
                .copied()
                .collect()
        };

        for id in subscribers {
            let Some(comp) = self.computation(id) else {
                continue;
            };
            if comp.is_computed {
                self.cascade_dirty(id);
            }
            let rerun = Rerun::new(self.clone(), id);
            match &comp.schedule {
                Some(schedule) => schedule(rerun),
                None => rerun.run(),
            }
        }
    }

    /// Run `f` with tracking suppressed, restoring the previous state after.
    ///
    /// Reads performed inside `f` create no subscriptions. Watch callbacks
    /// run under this, and diagnostic reads should too.
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        let prev = self.inner.suppressed.swap(true, Ordering::Relaxed);
        let _restore = FlagGuard {
            flag: &self.inner.suppressed,
            prev,
        };
        f()
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Register an effect and run it once, eagerly, to discover its
    /// dependency set. Re-runs on any subsequent invalidation.
    ///
    /// Panics raised by `f` propagate to the caller; the execution stack and
    /// the registration guard are restored on unwind.
    pub fn effect<F>(&self, f: F) -> Effect
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.effect_with(f, EffectOptions::default())
    }

    /// Like [`Runtime::effect`], with a schedule hook installed before the
    /// first run. Subsequent invalidations call the hook with a
    /// re-subscribing [`Rerun`] instead of re-running `f` directly.
    pub fn effect_with<F>(&self, f: F, options: EffectOptions) -> Effect
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = SubscriberId::new();
        self.insert_computation(id, Computation::new(Arc::new(f), options.schedule));

        let prev = self.inner.registering.swap(true, Ordering::Relaxed);
        {
            let _restore = FlagGuard {
                flag: &self.inner.registering,
                prev,
            };
            Rerun::new(self.clone(), id).run();
        }

        Effect::new(self.clone(), id)
    }

    /// Create a memoized derivation over `derive`.
    ///
    /// The derivation is lazy: it does not run until the first
    /// [`Computed::get`], and re-runs only when a dependency has actually
    /// invalidated it.
    pub fn computed<T, F>(&self, derive: F) -> Computed<T>
    where
        T: Clone + PartialEq + Send + Sync + 'static,
        F: Fn() -> T + Send + Sync + 'static,
    {
        Computed::new(self, derive)
    }

    // ------------------------------------------------------------------
    // Internals shared with the other modules
    // ------------------------------------------------------------------

    pub(crate) fn computation(&self, id: SubscriberId) -> Option<Computation> {
        self.inner.computations.read().get(&id).cloned()
    }

    pub(crate) fn insert_computation(&self, id: SubscriberId, computation: Computation) {
        self.inner.computations.write().insert(id, computation);
    }

    pub(crate) fn stack_root(&self) -> Option<Frame> {
        self.inner.stack.root()
    }

    /// Mark `root` and every computed transitively depending on it dirty.
    ///
    /// Iterative with an already-seen set, so diamond-shaped graphs and deep
    /// chains terminate without unbounded recursion. Marking is idempotent.
    pub(crate) fn cascade_dirty(&self, root: SubscriberId) {
        let mut queue: SmallVec<[SubscriberId; 8]> = SmallVec::new();
        let mut seen: IndexSet<SubscriberId> = IndexSet::new();
        queue.push(root);

        while let Some(id) = queue.pop() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(comp) = self.computation(id) {
                if let Some(state) = &comp.state {
                    state.mark_dirty();
                }
            }
            if let Some(dependents) = self.inner.computed_dependents.read().get(&id) {
                queue.extend(dependents.iter().copied());
            }
        }
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    /// Dump the current registry contents, keyed by entity id.
    ///
    /// Development-only: returns [`ReactiveError::InspectDisabled`] outside
    /// debug builds.
    pub fn registry_snapshot(&self) -> Result<serde_json::Value, ReactiveError> {
        if !cfg!(debug_assertions) {
            return Err(ReactiveError::InspectDisabled);
        }

        let registry = self.inner.registry.read();
        let mut entities: Vec<EntitySnapshot> = registry
            .iter()
            .map(|(entity, keys)| EntitySnapshot {
                entity: entity.raw(),
                keys: keys
                    .iter()
                    .map(|(key, subscribers)| KeySnapshot {
                        key: key.to_string(),
                        subscribers: subscribers.iter().map(|id| id.raw()).collect(),
                    })
                    .collect(),
            })
            .collect();
        entities.sort_by_key(|snapshot| snapshot.entity);

        Ok(serde_json::to_value(RegistrySnapshot { entities })?)
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("entities", &self.inner.registry.read().len())
            .field("computations", &self.inner.computations.read().len())
            .field("stack_depth", &self.inner.stack.depth())
            .finish()
    }
}

/// Restores a boolean flag to its previous value on drop, so guard windows
/// close even when user code panics.
struct FlagGuard<'a> {
    flag: &'a AtomicBool,
    prev: bool,
}

impl Drop for FlagGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(self.prev, Ordering::Relaxed);
    }
}

#[derive(Serialize)]
struct RegistrySnapshot {
    entities: Vec<EntitySnapshot>,
}

#[derive(Serialize)]
struct EntitySnapshot {
    entity: u64,
    keys: Vec<KeySnapshot>,
}

#[derive(Serialize)]
struct KeySnapshot {
    key: String,
    subscribers: Vec<u64>,
}

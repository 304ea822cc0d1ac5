//! Filament Core
//!
//! This crate implements a fine-grained reactive dependency-tracking engine:
//! a runtime that records which computations read which pieces of mutable
//! state and re-runs (or schedules re-runs of) those computations when the
//! state changes. Callers never declare dependencies; the graph is
//! rediscovered on every run.
//!
//! # Concepts
//!
//! ## Track and trigger
//!
//! The whole engine hangs off two primitives. `track(entity, key)` records
//! the currently-running computation as a subscriber of a slot;
//! `trigger(entity, key)` notifies and re-runs the slot's subscribers. The
//! built-in cells and collections call them internally, and any external
//! wrapper type can plug in through the same two calls.
//!
//! ## Effects
//!
//! An effect is a side-effecting computation registered with
//! [`Runtime::effect`]. It runs once eagerly to discover its dependencies
//! and re-runs whenever one of them changes, unless a schedule hook replaces
//! the default re-invocation policy.
//!
//! ## Computeds
//!
//! A computed is a memoized derivation. It evaluates lazily, caches its
//! value, and is invalidated by upstream triggers; invalidation cascades
//! through chains of computeds via a dedicated dependents graph. A computed
//! that re-derives an unchanged value does not disturb its own subscribers.
//!
//! ## Watch
//!
//! [`Runtime::watch`] harvests a source computation's dependencies once and
//! invokes a callback on every subsequent change, with the callback's own
//! reads exempt from tracking.
//!
//! # Execution model
//!
//! Single logical thread, fully synchronous: a trigger cascade completes
//! before the mutation that caused it returns. Re-entrancy is ordinary
//! recursion through the execution stack. Each [`Runtime`] instance owns its
//! state outright, so independent runtimes (one per test, say) do not
//! interact.
//!
//! # Example
//!
//! ```rust
//! use filament_core::Runtime;
//!
//! let rt = Runtime::new();
//! let count = rt.cell(0);
//!
//! let doubled = {
//!     let count = count.clone();
//!     rt.computed(move || count.get() * 2)
//! };
//!
//! let observed = {
//!     let doubled = doubled.clone();
//!     rt.effect(move || {
//!         let _ = doubled.get();
//!     })
//! };
//!
//! count.set(5);
//! assert_eq!(doubled.get(), 10);
//! # let _ = observed;
//! ```

mod cell;
mod computed;
mod context;
mod effect;
mod error;
mod key;
mod map;
mod runtime;
mod set;
mod watch;

pub use cell::ReactiveCell;
pub use computed::{Computed, ComputedState};
pub use context::SubscriberId;
pub use effect::{Effect, EffectOptions, Rerun};
pub use error::ReactiveError;
pub use key::{EntityId, Key, KeyToken};
pub use map::ReactiveMap;
pub use runtime::Runtime;
pub use set::ReactiveSet;

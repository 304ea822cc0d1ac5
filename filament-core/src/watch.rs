//! Watch Bindings
//!
//! `watch` runs a source computation once, purely to harvest its dependency
//! set, and from then on invokes a callback whenever any of those
//! dependencies changes. The callback runs with tracking suppressed, so its
//! own reads never become dependencies of anything; and because the schedule
//! hook never invokes its re-subscribing wrapper, the source keeps the
//! dependency set discovered on registration.

use std::sync::Arc;

use crate::effect::{Effect, EffectOptions};
use crate::runtime::Runtime;

impl Runtime {
    /// Run `source` once to discover its dependencies, then invoke
    /// `callback` on every subsequent change to any of them.
    ///
    /// The callback is not invoked for the initial discovery run.
    pub fn watch<S, C>(&self, source: S, callback: C) -> Effect
    where
        S: Fn() + Send + Sync + 'static,
        C: Fn() + Send + Sync + 'static,
    {
        let runtime = self.clone();
        let callback = Arc::new(callback);
        self.effect_with(
            source,
            EffectOptions::scheduled(move |_rerun| {
                let callback = Arc::clone(&callback);
                runtime.untracked(|| callback());
            }),
        )
    }
}

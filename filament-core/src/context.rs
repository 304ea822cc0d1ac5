//! Execution Stack
//!
//! The execution stack tracks which computation is currently running so the
//! runtime can record dependencies: when an observed slot is read, the
//! top-of-stack computation becomes its subscriber.
//!
//! Nested computations are ordinary stack entries (a computed evaluated
//! while an effect runs, or while another computed runs). Each frame also
//! carries a tracking-enabled flag so a stretch of a computation's body can
//! opt out of subscribing without disturbing outer frames.
//!
//! Entering a frame returns a guard that pops on drop, so the stack stays
//! balanced even when a computation panics.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;

/// Unique identifier for a registered computation.
///
/// Effects and computed derivations both get one at registration time. The
/// id is the computation's identity in the subscription registry and the
/// computed-dependents graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber id.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw id value. Diagnostics only.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// One entry on the execution stack.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Frame {
    pub id: SubscriberId,
    pub is_computed: bool,
    pub tracking: bool,
}

/// Stack of currently-running computations, owned by a runtime instance.
#[derive(Default)]
pub(crate) struct ExecutionStack {
    frames: Mutex<Vec<Frame>>,
}

impl ExecutionStack {
    /// Push a frame. The returned guard pops it when dropped.
    pub(crate) fn enter(&self, frame: Frame) -> StackScope<'_> {
        self.frames.lock().push(frame);
        StackScope {
            stack: self,
            id: frame.id,
        }
    }

    /// The currently-active computation, if any.
    pub(crate) fn top(&self) -> Option<Frame> {
        self.frames.lock().last().copied()
    }

    /// The top frame and the one directly beneath it.
    pub(crate) fn top_two(&self) -> (Option<Frame>, Option<Frame>) {
        let frames = self.frames.lock();
        let n = frames.len();
        let top = (n >= 1).then(|| frames[n - 1]);
        let beneath = (n >= 2).then(|| frames[n - 2]);
        (top, beneath)
    }

    /// The outermost frame of the current tracking context, if any.
    pub(crate) fn root(&self) -> Option<Frame> {
        self.frames.lock().first().copied()
    }

    pub(crate) fn depth(&self) -> usize {
        self.frames.lock().len()
    }
}

/// Guard that pops the stack when dropped.
pub(crate) struct StackScope<'a> {
    stack: &'a ExecutionStack,
    id: SubscriberId,
}

impl Drop for StackScope<'_> {
    fn drop(&mut self) {
        let popped = self.stack.frames.lock().pop();

        // Catch mismatched push/pop pairs early in debug builds.
        if let Some(frame) = popped {
            debug_assert_eq!(
                frame.id, self.id,
                "execution stack mismatch: expected {:?}, got {:?}",
                self.id, frame.id
            );
        }
    }
}

//! Error Types
//!
//! The engine surfaces very few errors by design. Rejected writes (computed
//! result cells, read-only values) are silently ignored, and panics raised
//! by user computations propagate uncaught. What remains is misuse of the
//! diagnostic surface.

use thiserror::Error;

/// Errors surfaced by the diagnostic API.
#[derive(Debug, Error)]
pub enum ReactiveError {
    /// The registry snapshot is only available in debug builds.
    #[error("registry inspection is not available outside debug builds")]
    InspectDisabled,

    /// The registry snapshot could not be serialized.
    #[error("failed to encode registry snapshot: {0}")]
    Snapshot(#[from] serde_json::Error),
}

//! Errors raised by the resource lifecycle.

use provisio_types::ResourceState;
use thiserror::Error;

/// Failure of a lifecycle step.
#[derive(Debug, Error)]
pub enum LifecycleError {
    /// Schema, codec or accessor error.
    #[error(transparent)]
    Engine(#[from] provisio_types::Error),

    /// Error returned by the resource's handler.
    #[error("handler failed: {0:#}")]
    Handler(#[from] anyhow::Error),

    /// The resource has no update operation and the diff does not require
    /// replacement.
    #[error("resource does not support update")]
    UpdateUnsupported,
}

/// A failed lifecycle operation together with the state it left behind.
///
/// A handler can fail after creating or changing part of a resource. The
/// state is what was known at the point of failure and should be persisted
/// by the caller. If that state could not be built, `state` is `None` and
/// `snapshot_error` says why.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct OperationError {
    pub state: Option<ResourceState>,
    #[source]
    pub source: LifecycleError,
    pub snapshot_error: Option<provisio_types::Error>,
}

impl OperationError {
    pub fn new(state: Option<ResourceState>, source: impl Into<LifecycleError>) -> Self {
        Self {
            state,
            source: source.into(),
            snapshot_error: None,
        }
    }
}

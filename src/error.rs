use std::sync::Arc;

use thiserror::Error;

/// A failure produced while computing a node.
///
/// The outcome of a node is shared by every dependent and by every thread
/// blocked on it, so the underlying error is reference-counted and the whole
/// thing is freely cloneable. `ComputeError` implements [`std::error::Error`],
/// which lets a dependent's combine attempt propagate it with `?` — that is
/// how a child failure re-raises inside its ancestors.
#[derive(Debug, Error, Clone)]
#[error(transparent)]
pub struct ComputeError(#[from] pub(crate) Arc<anyhow::Error>);

impl ComputeError {
    pub fn new(err: impl Into<anyhow::Error>) -> Self {
        Self(Arc::new(err.into()))
    }

    /// Borrow the underlying error chain.
    pub fn inner(&self) -> &anyhow::Error {
        &self.0
    }
}

impl From<anyhow::Error> for ComputeError {
    fn from(err: anyhow::Error) -> Self {
        ComputeError(Arc::new(err))
    }
}

/// Errors raised while setting up a [`TreeComputer`](crate::TreeComputer).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Failed to build the worker pool")]
    PoolBuild(#[from] rayon::ThreadPoolBuildError),
}

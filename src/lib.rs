#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod engine;
mod error;
mod executor;
mod tree;

pub use crate::engine::TreeComputer;
pub use crate::error::{ComputeError, EngineError};
pub use crate::executor::{Job, Spawn};
pub use crate::tree::{
    ComputationTree, NodeId, and, list, map, pair, transform_each, tuple2, tuple3, tuple4, tuple5,
};

/// Optional `tracing` subscriber setup for applications that have none of
/// their own.
#[cfg(feature = "logging")]
pub mod logging {
    use tracing_subscriber::EnvFilter;

    /// Install a global `fmt` subscriber filtered by `RUST_LOG`.
    pub fn init() {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .init();
    }
}

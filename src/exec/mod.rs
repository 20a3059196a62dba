// src/exec/mod.rs

//! Execution layer.
//!
//! - [`backend`] provides the `Executor` trait the scheduler submits to.
//! - [`queue`] provides `OperationQueue`, a dependency-aware executor with a
//!   concurrency ceiling, backed by its own Tokio runtime.
//! - `driver` holds the per-operation task that waits for dependencies,
//!   suspension and a concurrency slot before running the body.

pub mod backend;
mod driver;
pub mod queue;

pub use backend::Executor;
pub use queue::OperationQueue;

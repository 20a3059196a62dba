// src/exec/backend.rs

//! Pluggable executor abstraction.
//!
//! The subgroup scheduler talks to an `Executor` instead of a concrete
//! queue. This makes it easy to swap in a fake executor in tests while
//! keeping the production implementation in [`super::queue`].
//!
//! - `OperationQueue` is the default implementation.
//! - Tests can provide their own `Executor` that, for example, records
//!   submissions and runs them by hand.

use std::sync::Arc;

use crate::errors::Result;
use crate::operation::Operation;

/// Capability consumed by the scheduler.
///
/// An implementation must:
/// - not start `op` before every dependency of `op` has settled
///   (`Operation::start` enforces this for executors that drive operations
///   themselves)
/// - eventually settle every accepted operation exactly once, including
///   cancelled ones
/// - return an error, without settling, when it refuses `op`
pub trait Executor: Send + Sync {
    fn submit(&self, op: Operation) -> Result<()>;
}

impl<E: Executor + ?Sized> Executor for Arc<E> {
    fn submit(&self, op: Operation) -> Result<()> {
        (**self).submit(op)
    }
}

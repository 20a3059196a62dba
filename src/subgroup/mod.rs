// src/subgroup/mod.rs

//! Subgroup scheduling on top of an [`Executor`](crate::exec::Executor).
//!
//! - [`registry`] holds the key → pending-operations map.
//! - [`queue`] provides `SubGroupQueue`, which chains each new operation
//!   behind the tail of its subgroup before handing it to the executor.
//! - [`dynamic`] provides `AnyKey` for queues that mix key types.

use std::fmt::Debug;
use std::hash::Hash;

pub mod dynamic;
pub mod queue;
pub mod registry;

pub use dynamic::{AnyKey, DynamicSubGroupQueue};
pub use queue::SubGroupQueue;

/// Anything usable as a subgroup key.
pub trait SubGroupKey: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

impl<T> SubGroupKey for T where T: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

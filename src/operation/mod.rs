// src/operation/mod.rs

//! Operations: units of work with dependencies and a completion signal.
//!
//! - [`state`] holds identity, lifecycle state and terminal outcome.
//! - [`handle`] holds the shared [`Operation`] handle and its builder.

pub mod handle;
pub mod state;

pub(crate) use handle::Begin;
pub use handle::{Operation, OperationBuilder};
pub use state::{OperationId, OperationState, Outcome};

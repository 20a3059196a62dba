// src/operation/state.rs

//! Identity, lifecycle state and terminal outcome of an operation.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque, process-unique identity of an [`Operation`](super::Operation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(u64);

impl OperationId {
    pub(crate) fn next() -> Self {
        OperationId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op#{}", self.0)
    }
}

/// Lifecycle of an operation.
///
/// `Ready` and `Executing` are driven by the executor. `Finished` and
/// `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    /// Created, or submitted and still waiting on dependencies.
    Pending,
    /// All dependencies are terminal; waiting for a concurrency slot.
    Ready,
    Executing,
    /// The body ran, successfully or not.
    Finished,
    /// Settled without running its body.
    Cancelled,
}

impl OperationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, OperationState::Finished | OperationState::Cancelled)
    }
}

/// How an operation settled.
///
/// A failed body is still "finished" for ordering purposes: its subgroup
/// successor runs regardless.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    /// The body returned an error or panicked.
    Failed(String),
    Cancelled,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Succeeded)
    }

    pub(crate) fn terminal_state(&self) -> OperationState {
        match self {
            Outcome::Cancelled => OperationState::Cancelled,
            Outcome::Succeeded | Outcome::Failed(_) => OperationState::Finished,
        }
    }
}

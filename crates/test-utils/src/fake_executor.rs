use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use subgroup_queue::errors::{Result, SubGroupError};
use subgroup_queue::{Executor, Operation, Outcome};

/// An executor that only records submissions. Tests drive execution by
/// hand with [`run_next`](Self::run_next) and [`run_all`](Self::run_all),
/// on the calling thread.
#[derive(Clone, Default)]
pub struct ManualExecutor {
    pending: Arc<Mutex<VecDeque<Operation>>>,
    submitted: Arc<Mutex<Vec<Operation>>>,
}

impl ManualExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything ever submitted, in submission order.
    pub fn submitted(&self) -> Vec<Operation> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Start the oldest submitted operation that is able to start.
    ///
    /// Returns `None` when nothing is runnable.
    pub fn run_next(&self) -> Option<(Operation, Outcome)> {
        let mut pending = self.pending.lock().unwrap();
        let position = pending
            .iter()
            .position(|op| op.dependencies().iter().all(Operation::is_finished))?;
        let op = pending.remove(position)?;
        drop(pending);

        let outcome = op.start().expect("runnable operation failed to start");
        Some((op, outcome))
    }

    /// Run until nothing is runnable. Returns the operations in run order.
    pub fn run_all(&self) -> Vec<Operation> {
        std::iter::from_fn(|| self.run_next())
            .map(|(op, _)| op)
            .collect()
    }
}

impl Executor for ManualExecutor {
    fn submit(&self, op: Operation) -> Result<()> {
        self.submitted.lock().unwrap().push(op.clone());
        self.pending.lock().unwrap().push_back(op);
        Ok(())
    }
}

/// An executor that refuses every submission.
#[derive(Debug, Clone, Default)]
pub struct RejectingExecutor;

impl Executor for RejectingExecutor {
    fn submit(&self, op: Operation) -> Result<()> {
        Err(SubGroupError::Rejected {
            id: op.id(),
            reason: "rejecting executor".to_string(),
        })
    }
}

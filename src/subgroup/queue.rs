// src/subgroup/queue.rs

//! `SubGroupQueue`: per-key FIFO on top of a concurrent executor.

use std::borrow::Borrow;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::{ConfigFile, QueueSection};
use crate::errors::Result;
use crate::exec::{Executor, OperationQueue};
use crate::operation::Operation;
use crate::subgroup::registry::SubGroupMap;
use crate::subgroup::SubGroupKey;
use crate::types::Limit;

/// Runs operations that share a key strictly one after another, in the order
/// they were added, while operations with different keys run concurrently.
///
/// Ordering is enforced by dependencies, not by locking: every new operation
/// is made to depend on the last unfinished operation of its subgroup before
/// it reaches the executor. Settled operations remove themselves from their
/// subgroup through a completion hook.
///
/// ```no_run
/// use subgroup_queue::SubGroupQueue;
///
/// let queue = SubGroupQueue::<String>::new()?;
/// queue.add_operation_with_block(|| println!("first"), "user-42")?;
/// queue.add_operation_with_block(|| println!("second"), "user-42")?;
/// queue.wait_until_all_operations_are_finished();
/// # Ok::<(), subgroup_queue::SubGroupError>(())
/// ```
pub struct SubGroupQueue<K: SubGroupKey, E: Executor = OperationQueue> {
    executor: E,
    groups: Arc<SubGroupMap<K>>,
}

impl<K: SubGroupKey> SubGroupQueue<K, OperationQueue> {
    /// A queue on a fresh `OperationQueue` with default settings.
    pub fn new() -> Result<Self> {
        Self::from_section(&QueueSection::default())
    }

    pub fn from_config(cfg: &ConfigFile) -> Result<Self> {
        Self::from_section(&cfg.queue)
    }

    pub fn from_section(section: &QueueSection) -> Result<Self> {
        Ok(Self::with_executor(OperationQueue::new(section)?))
    }

    pub fn with_max_concurrent(limit: impl Into<Limit>) -> Result<Self> {
        Ok(Self::with_executor(OperationQueue::with_max_concurrent(limit)?))
    }

    pub fn set_suspended(&self, suspended: bool) {
        self.executor.set_suspended(suspended);
    }

    pub fn is_suspended(&self) -> bool {
        self.executor.is_suspended()
    }

    pub fn cancel_all_operations(&self) {
        self.executor.cancel_all_operations();
    }

    /// Block until every operation submitted to the underlying queue has
    /// settled.
    pub fn wait_until_all_operations_are_finished(&self) {
        self.executor.wait_until_all_operations_are_finished();
    }
}

impl<K: SubGroupKey, E: Executor> SubGroupQueue<K, E> {
    pub fn with_executor(executor: E) -> Self {
        Self {
            executor,
            groups: Arc::new(SubGroupMap::new()),
        }
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    /// Add one operation to the subgroup `key`.
    ///
    /// `op` will not start before every operation previously added under
    /// `key` has settled.
    pub fn add_operation(&self, op: &Operation, key: impl Into<K>) -> Result<()> {
        self.add_operations(std::slice::from_ref(op), key, false)
    }

    /// Add `ops` to the subgroup `key`, in order, as one contiguous run.
    ///
    /// With `wait`, blocks until every accepted operation has settled. Do not
    /// wait from inside an operation of the same subgroup: it would wait on
    /// itself.
    ///
    /// If an operation was already handed to a queue nothing is added. If
    /// one cannot be chained (a dependency cycle) the operations before it
    /// are kept and the rest are not added. If the executor refuses an
    /// operation it is settled as cancelled and dropped from the subgroup.
    /// In every case the first error is returned.
    pub fn add_operations(&self, ops: &[Operation], key: impl Into<K>, wait: bool) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let key = key.into();

        claim_all(ops)?;

        let (appended, wiring_error) = self.groups.append(&key, ops);
        let (accepted, refused) = ops.split_at(appended);
        for op in refused {
            op.release_enqueued();
        }
        if let Some(err) = &wiring_error {
            warn!(key = ?key, error = %err, refused = refused.len(), "could not chain operations into subgroup");
        }

        for op in accepted {
            self.remove_on_completion(op, &key);
        }

        debug!(key = ?key, count = accepted.len(), "submitting subgroup operations");
        let mut first_error = wiring_error;
        for op in accepted {
            if let Err(err) = self.executor.submit(op.clone()) {
                warn!(key = ?key, op = %op.id(), error = %err, "executor refused operation");
                op.abandon();
                first_error.get_or_insert(err);
            }
        }

        if wait {
            for op in accepted {
                op.wait_until_finished();
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Wrap `body` in an operation and add it to the subgroup `key`.
    pub fn add_operation_with_block<F>(&self, body: F, key: impl Into<K>) -> Result<Operation>
    where
        F: FnOnce() + Send + 'static,
    {
        let op = Operation::new(body);
        self.add_operation(&op, key)?;
        Ok(op)
    }

    /// The unsettled operations of `key`, oldest first. Empty for unknown
    /// keys.
    pub fn subgroup_operations<Q>(&self, key: &Q) -> Vec<Operation>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.groups.snapshot(key)
    }

    /// Keys with at least one unsettled operation.
    pub fn subgroup_keys(&self) -> Vec<K> {
        self.groups.keys()
    }

    /// Unsettled operations across all subgroups.
    pub fn pending_operation_count(&self) -> usize {
        self.groups.pending_count()
    }

    fn remove_on_completion(&self, op: &Operation, key: &K) {
        let groups = Arc::downgrade(&self.groups);
        let key = key.clone();
        op.on_completion(move |id, _| {
            if let Some(groups) = groups.upgrade() {
                groups.remove(&key, id);
            }
        });
    }
}

/// Claim every operation for this queue, or none of them.
fn claim_all(ops: &[Operation]) -> Result<()> {
    for (claimed, op) in ops.iter().enumerate() {
        if let Err(err) = op.mark_enqueued() {
            for op in &ops[..claimed] {
                op.release_enqueued();
            }
            return Err(err);
        }
    }
    Ok(())
}

impl<K: SubGroupKey, E: Executor + fmt::Debug> fmt::Debug for SubGroupQueue<K, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubGroupQueue")
            .field("executor", &self.executor)
            .field("subgroups", &self.groups.keys().len())
            .field("pending", &self.groups.pending_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::errors::SubGroupError;
    use crate::operation::OperationState;

    /// Records submissions without running anything.
    #[derive(Default)]
    struct Recording(Mutex<Vec<Operation>>);

    impl Executor for Recording {
        fn submit(&self, op: Operation) -> Result<()> {
            self.0.lock().unwrap().push(op);
            Ok(())
        }
    }

    struct Refusing;

    impl Executor for Refusing {
        fn submit(&self, op: Operation) -> Result<()> {
            Err(SubGroupError::Rejected {
                id: op.id(),
                reason: "closed".into(),
            })
        }
    }

    #[test]
    fn submission_chains_behind_the_tail() {
        let queue = SubGroupQueue::<&str, _>::with_executor(Recording::default());
        let a = Operation::new(|| {});
        let b = Operation::new(|| {});
        let other = Operation::new(|| {});

        queue.add_operation(&a, "k").unwrap();
        queue.add_operation(&b, "k").unwrap();
        queue.add_operation(&other, "j").unwrap();

        assert_eq!(b.dependencies(), vec![a.clone()]);
        assert!(other.dependencies().is_empty());
        assert_eq!(queue.subgroup_operations(&"k"), vec![a.clone(), b.clone()]);
        assert_eq!(queue.executor().0.lock().unwrap().len(), 3);

        a.start().unwrap();
        assert_eq!(queue.subgroup_operations(&"k"), vec![b.clone()]);
        b.start().unwrap();
        other.start().unwrap();
        assert!(queue.subgroup_operations(&"k").is_empty());
        assert_eq!(queue.pending_operation_count(), 0);
    }

    #[test]
    fn adding_the_same_operation_twice_fails_without_side_effects() {
        let queue = SubGroupQueue::<&str, _>::with_executor(Recording::default());
        let a = Operation::new(|| {});
        queue.add_operation(&a, "k").unwrap();

        let b = Operation::new(|| {});
        let err = queue.add_operations(&[b.clone(), a.clone()], "k", false);
        assert!(matches!(err, Err(SubGroupError::AlreadyEnqueued(id)) if id == a.id()));
        assert!(!b.is_enqueued());
        assert_eq!(queue.subgroup_operations(&"k"), vec![a]);
    }

    #[test]
    fn refused_operations_are_settled_and_pruned() {
        let queue = SubGroupQueue::<&str, _>::with_executor(Refusing);
        let a = Operation::new(|| {});

        let err = queue.add_operation(&a, "k");
        assert!(matches!(err, Err(SubGroupError::Rejected { .. })));
        assert_eq!(a.state(), OperationState::Cancelled);
        assert!(a.is_finished());
        assert!(queue.subgroup_keys().is_empty());
    }

    #[test]
    fn empty_batch_is_a_no_op() {
        let queue = SubGroupQueue::<&str, _>::with_executor(Refusing);
        queue.add_operations(&[], "k", true).unwrap();
        assert_eq!(queue.pending_operation_count(), 0);
    }
}

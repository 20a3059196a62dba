// src/exec/queue.rs

//! `OperationQueue`: the default [`Executor`].

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use tokio::runtime::Runtime;
use tokio::sync::{watch, Semaphore};
use tracing::{debug, info, warn};

use crate::config::{validate_queue_section, ConfigFile, QueueSection};
use crate::errors::{Result, SubGroupError};
use crate::exec::backend::Executor;
use crate::exec::driver;
use crate::operation::{Operation, OperationId};
use crate::types::Limit;

/// State shared between the queue handle and its driver tasks.
pub(crate) struct QueueShared {
    pub(crate) name: String,
    /// `None` when unbounded.
    pub(crate) permits: Option<Arc<Semaphore>>,
    pub(crate) suspended: watch::Sender<bool>,
    max_concurrent: Option<usize>,
    accepting: AtomicBool,
    /// Submitted operations whose driver has not retired them yet.
    in_flight: Mutex<BTreeMap<OperationId, Operation>>,
    idle: Condvar,
}

impl QueueShared {
    fn in_flight(&self) -> MutexGuard<'_, BTreeMap<OperationId, Operation>> {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn track(&self, op: Operation) {
        self.in_flight().insert(op.id(), op);
    }

    /// Forget a settled operation and wake idle waiters when none remain.
    pub(crate) fn retire(&self, id: OperationId) {
        let mut in_flight = self.in_flight();
        in_flight.remove(&id);
        if in_flight.is_empty() {
            self.idle.notify_all();
        }
    }
}

/// A concurrent, dependency-aware operation executor.
///
/// Every submitted operation gets a lightweight driver task on the queue's
/// own Tokio runtime. The driver waits for the operation's dependencies, for
/// the queue to be running and for a concurrency slot, then runs the body on
/// Tokio's blocking pool. The number of bodies executing at once never
/// exceeds [`max_concurrent_operations`](Self::max_concurrent_operations).
///
/// Owning the runtime keeps the queue usable from plain threads; blocking
/// waits such as [`wait_until_all_operations_are_finished`] must not be
/// issued from inside one of the queue's own operations.
///
/// [`wait_until_all_operations_are_finished`]: Self::wait_until_all_operations_are_finished
pub struct OperationQueue {
    shared: Arc<QueueShared>,
    runtime: Option<Runtime>,
}

impl OperationQueue {
    pub fn new(config: &QueueSection) -> Result<Self> {
        validate_queue_section(config)?;

        let max_concurrent = config.max_concurrent_operations.resolve();

        let mut builder = tokio::runtime::Builder::new_multi_thread();
        builder
            .enable_all()
            .thread_name(format!("{}-worker", config.name));
        if let Some(threads) = config.worker_threads {
            builder.worker_threads(threads);
        }
        let runtime = builder.build()?;

        let (suspended, _) = watch::channel(config.start_suspended);

        info!(
            queue = %config.name,
            max_concurrent = ?max_concurrent,
            suspended = config.start_suspended,
            "operation queue started"
        );

        Ok(Self {
            shared: Arc::new(QueueShared {
                name: config.name.clone(),
                permits: max_concurrent.map(|n| Arc::new(Semaphore::new(n))),
                suspended,
                max_concurrent,
                accepting: AtomicBool::new(true),
                in_flight: Mutex::new(BTreeMap::new()),
                idle: Condvar::new(),
            }),
            runtime: Some(runtime),
        })
    }

    pub fn from_config(cfg: &ConfigFile) -> Result<Self> {
        Self::new(&cfg.queue)
    }

    /// Default settings with the given ceiling.
    pub fn with_max_concurrent(limit: impl Into<Limit>) -> Result<Self> {
        Self::new(&QueueSection::default().with_max_concurrent(limit))
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// `None` means unbounded.
    pub fn max_concurrent_operations(&self) -> Option<usize> {
        self.shared.max_concurrent
    }

    /// Submit an operation without any subgroup.
    pub fn add_operation(&self, op: &Operation) -> Result<()> {
        op.mark_enqueued()?;
        self.submit(op.clone()).inspect_err(|_| {
            op.abandon();
        })
    }

    pub fn add_operation_with_block<F>(&self, body: F) -> Result<Operation>
    where
        F: FnOnce() + Send + 'static,
    {
        let op = Operation::new(body);
        self.add_operation(&op)?;
        Ok(op)
    }

    /// While suspended, no new operation starts executing. Running ones are
    /// unaffected.
    pub fn set_suspended(&self, suspended: bool) {
        let previous = self.shared.suspended.send_replace(suspended);
        if previous != suspended {
            debug!(queue = %self.shared.name, suspended, "queue suspension changed");
        }
    }

    pub fn is_suspended(&self) -> bool {
        *self.shared.suspended.borrow()
    }

    /// Operations submitted and not yet settled.
    pub fn operation_count(&self) -> usize {
        self.shared.in_flight().len()
    }

    /// Snapshot of unsettled operations, in creation order.
    pub fn operations(&self) -> Vec<Operation> {
        self.shared.in_flight().values().cloned().collect()
    }

    pub fn cancel_all_operations(&self) {
        let ops = self.operations();
        debug!(queue = %self.shared.name, count = ops.len(), "cancelling all operations");
        for op in ops {
            op.cancel();
        }
    }

    /// Block until every submitted operation has settled.
    ///
    /// Never returns while the queue is suspended with work pending.
    pub fn wait_until_all_operations_are_finished(&self) {
        let in_flight = self.shared.in_flight();
        let _idle = self
            .shared
            .idle
            .wait_while(in_flight, |ops| !ops.is_empty())
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Refuse further submissions. Already accepted work keeps running.
    pub fn shutdown(&self) {
        if self.shared.accepting.swap(false, Ordering::AcqRel) {
            info!(queue = %self.shared.name, "operation queue no longer accepting work");
        }
    }

    pub fn is_accepting(&self) -> bool {
        self.shared.accepting.load(Ordering::Acquire)
    }
}

impl Executor for OperationQueue {
    fn submit(&self, op: Operation) -> Result<()> {
        let runtime = match &self.runtime {
            Some(runtime) if self.is_accepting() => runtime,
            _ => {
                warn!(queue = %self.shared.name, op = %op.id(), "rejecting operation; queue is shut down");
                return Err(SubGroupError::Rejected {
                    id: op.id(),
                    reason: format!("queue '{}' is shut down", self.shared.name),
                });
            }
        };

        debug!(queue = %self.shared.name, op = %op.id(), "operation submitted");
        self.shared.track(op.clone());
        runtime.spawn(driver::drive(Arc::clone(&self.shared), op));
        Ok(())
    }
}

impl fmt::Debug for OperationQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationQueue")
            .field("name", &self.shared.name)
            .field("max_concurrent", &self.shared.max_concurrent)
            .field("suspended", &self.is_suspended())
            .field("operation_count", &self.operation_count())
            .finish_non_exhaustive()
    }
}

impl Drop for OperationQueue {
    fn drop(&mut self) {
        self.shared.accepting.store(false, Ordering::Release);

        // Settle everything that has not started so no waiter hangs.
        let abandoned = self
            .operations()
            .into_iter()
            .filter(|op| op.abandon())
            .count();
        if abandoned > 0 {
            debug!(queue = %self.shared.name, abandoned, "abandoned pending operations on drop");
        }

        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

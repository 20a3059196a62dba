// src/exec/driver.rs

//! Per-operation driver task.

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::OwnedSemaphorePermit;
use tracing::{debug, trace, warn};

use crate::exec::queue::QueueShared;
use crate::operation::{Begin, Operation, Outcome};

/// Drive one submitted operation to completion.
///
/// 1. wait for every dependency to settle
/// 2. mark Ready, wait while the queue is suspended, take a concurrency slot
/// 3. run the body on the blocking pool while holding the slot
///
/// A cancelled operation still waits for its dependencies, then settles as
/// cancelled without a slot. A dependency added while waiting for a slot
/// sends the operation back to step 1.
pub(crate) async fn drive(queue: Arc<QueueShared>, op: Operation) {
    let id = op.id();

    loop {
        while let Some(dependency) = op.first_unfinished_dependency() {
            trace!(op = %id, dependency = %dependency.id(), "waiting on dependency");
            dependency.finished().await;
        }

        let slot = if op.is_cancelled() {
            None
        } else {
            op.mark_ready();
            match acquire_slot(&queue).await {
                Ok(slot) => slot,
                Err(err) => {
                    warn!(queue = %queue.name, op = %id, error = %err, "no execution slot; abandoning");
                    op.abandon();
                    break;
                }
            }
        };

        match op.begin() {
            Ok(Begin::Run) => {
                spawn_body(Arc::clone(&queue), op, slot);
                return;
            }
            Ok(Begin::Cancelled) => {
                debug!(queue = %queue.name, op = %id, "operation cancelled before start");
                break;
            }
            Ok(Begin::Blocked(dependency)) => {
                trace!(op = %id, dependency = %dependency.id(), "dependency added late; waiting again");
                drop(slot);
            }
            Err(err) => {
                warn!(queue = %queue.name, op = %id, error = %err, "operation could not start");
                break;
            }
        }
    }

    queue.retire(id);
}

/// Wait until the queue is running, then take a slot if the queue is bounded.
async fn acquire_slot(queue: &QueueShared) -> Result<Option<OwnedSemaphorePermit>> {
    let mut suspended = queue.suspended.subscribe();

    loop {
        suspended.wait_for(|s| !*s).await?;

        let permit = match &queue.permits {
            Some(semaphore) => Some(Arc::clone(semaphore).acquire_owned().await?),
            None => None,
        };

        // Suspension may have been switched back on while we waited.
        if !*suspended.borrow() {
            return Ok(permit);
        }
    }
}

fn spawn_body(queue: Arc<QueueShared>, op: Operation, slot: Option<OwnedSemaphorePermit>) {
    debug!(queue = %queue.name, op = %op.id(), name = ?op.name(), "executing operation");

    let mut guard = SettleOnDrop(Some(op));
    tokio::task::spawn_blocking(move || {
        let Some(op) = guard.0.take() else {
            return;
        };

        let outcome = op.run_body();
        if let Outcome::Failed(reason) = &outcome {
            warn!(queue = %queue.name, op = %op.id(), %reason, "operation failed");
        }
        op.complete(outcome);

        drop(slot);
        queue.retire(op.id());
    });
}

/// Settles the operation as cancelled if the blocking task is dropped
/// without running (runtime shutting down).
struct SettleOnDrop(Option<Operation>);

impl Drop for SettleOnDrop {
    fn drop(&mut self) {
        if let Some(op) = self.0.take() {
            op.complete(Outcome::Cancelled);
        }
    }
}

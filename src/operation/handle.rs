// src/operation/handle.rs

//! The shared [`Operation`] handle.

use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tracing::{debug, error, trace};

use super::state::{OperationId, OperationState, Outcome};
use crate::errors::{Result, SubGroupError};

pub(crate) type Body = Box<dyn FnOnce() -> anyhow::Result<()> + Send + 'static>;
type CompletionHook = Box<dyn FnOnce(OperationId, &Outcome) + Send + 'static>;

/// Held across a cycle walk and the edge insert it guards. Only taken when
/// the dependent operation is itself depended on.
static GRAPH_LOCK: Mutex<()> = Mutex::new(());

/// A unit of schedulable work.
///
/// `Operation` is a cheap, clonable handle; clones refer to the same
/// operation and compare equal by [`OperationId`]. An operation runs at most
/// once, only after every dependency has settled, and settles exactly once
/// with an [`Outcome`].
///
/// "Settled" means terminal *and* all completion hooks have run. Dependents
/// and waiters observe an operation only once it has settled, so anything a
/// hook does (such as pruning a subgroup) happens-before they proceed.
#[derive(Clone)]
pub struct Operation {
    inner: Arc<Inner>,
}

struct Inner {
    id: OperationId,
    name: Option<String>,
    body: Mutex<Option<Body>>,
    shared: Mutex<Shared>,
    settled: Condvar,
    settled_notify: Notify,
    cancel_requested: AtomicBool,
    enqueued: AtomicBool,
}

struct Shared {
    state: OperationState,
    /// Set together with the terminal state.
    outcome: Option<Outcome>,
    settled: bool,
    /// Released on completion so long chains don't pin every predecessor.
    dependencies: Vec<Operation>,
    /// Set once another operation has added this one as a dependency.
    has_dependents: bool,
    hooks: Vec<CompletionHook>,
}

/// Result of trying to move an operation into `Executing`.
pub(crate) enum Begin {
    /// The caller now owns execution of the body.
    Run,
    /// Cancellation was requested; the operation has been settled.
    Cancelled,
    /// This dependency has not settled yet.
    Blocked(Operation),
}

impl Operation {
    /// Wrap an infallible closure.
    pub fn new<F>(body: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        OperationBuilder::new().build(body)
    }

    /// Wrap a closure whose error is recorded as [`Outcome::Failed`].
    pub fn fallible<F>(body: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        OperationBuilder::new().build_fallible(body)
    }

    pub fn builder() -> OperationBuilder {
        OperationBuilder::new()
    }

    fn from_parts(name: Option<String>, body: Body) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: OperationId::next(),
                name,
                body: Mutex::new(Some(body)),
                shared: Mutex::new(Shared {
                    state: OperationState::Pending,
                    outcome: None,
                    settled: false,
                    dependencies: Vec::new(),
                    has_dependents: false,
                    hooks: Vec::new(),
                }),
                settled: Condvar::new(),
                settled_notify: Notify::new(),
                cancel_requested: AtomicBool::new(false),
                enqueued: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> OperationId {
        self.inner.id
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    pub fn state(&self) -> OperationState {
        self.shared().state
    }

    /// The terminal outcome, once the operation is `Finished` or `Cancelled`.
    pub fn outcome(&self) -> Option<Outcome> {
        self.shared().outcome.clone()
    }

    /// `true` once the operation is terminal and its completion hooks ran.
    pub fn is_finished(&self) -> bool {
        self.shared().settled
    }

    /// `true` if cancellation was requested, whether or not it took effect.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel_requested.load(Ordering::Acquire)
    }

    /// `true` once a queue has accepted this operation.
    pub fn is_enqueued(&self) -> bool {
        self.inner.enqueued.load(Ordering::Acquire)
    }

    /// Current (unsettled) dependencies. Empty after completion.
    pub fn dependencies(&self) -> Vec<Operation> {
        self.shared().dependencies.clone()
    }

    /// Make this operation wait for `dependency` to settle before running.
    ///
    /// Fails if the edge would create a cycle or this operation has already
    /// started. Adding an existing edge is a no-op.
    ///
    /// Chaining a fresh operation behind others is O(1): the graph is only
    /// walked when this operation is itself a dependency of something.
    pub fn add_dependency(&self, dependency: &Operation) -> Result<()> {
        if dependency == self {
            return Err(self.cycle_with(dependency));
        }

        // Marked before our own check so that a concurrent edge in the other
        // direction always sees one of the two marks and walks.
        dependency.shared().has_dependents = true;

        {
            let mut shared = self.shared();
            if !shared.has_dependents {
                // Nothing can reach `self`, so the edge cannot close a cycle.
                return self.push_dependency(&mut shared, dependency);
            }
        }

        let _graph = GRAPH_LOCK.lock().unwrap_or_else(PoisonError::into_inner);
        if dependency.depends_on(self) {
            return Err(self.cycle_with(dependency));
        }
        self.push_dependency(&mut self.shared(), dependency)
    }

    fn push_dependency(&self, shared: &mut Shared, dependency: &Operation) -> Result<()> {
        if !matches!(shared.state, OperationState::Pending | OperationState::Ready) {
            return Err(SubGroupError::AlreadyStarted(self.id()));
        }
        if shared.dependencies.iter().any(|d| d == dependency) {
            return Ok(());
        }
        shared.dependencies.push(dependency.clone());
        // A new edge may have made a Ready operation wait again.
        shared.state = OperationState::Pending;

        trace!(op = %self.id(), dependency = %dependency.id(), "dependency added");
        Ok(())
    }

    fn cycle_with(&self, dependency: &Operation) -> SubGroupError {
        SubGroupError::DependencyCycle {
            operation: self.id(),
            dependency: dependency.id(),
        }
    }

    /// Request cancellation.
    ///
    /// An operation that has not started settles as [`Outcome::Cancelled`]
    /// without running its body once its executor reaches it. Its executor
    /// still waits for its dependencies first, so cancelling never lets a
    /// successor overtake a running predecessor. Executing bodies are not
    /// interrupted.
    pub fn cancel(&self) {
        if !self.inner.cancel_requested.swap(true, Ordering::AcqRel) {
            debug!(op = %self.id(), "cancellation requested");
        }
    }

    /// Register a hook that runs exactly once when the operation settles.
    ///
    /// If the operation is already terminal the hook runs immediately on the
    /// calling thread. Hooks run without any operation lock held.
    pub fn on_completion<F>(&self, hook: F)
    where
        F: FnOnce(OperationId, &Outcome) + Send + 'static,
    {
        let outcome = {
            let mut shared = self.shared();
            match &shared.outcome {
                Some(outcome) => outcome.clone(),
                None => {
                    shared.hooks.push(Box::new(hook));
                    return;
                }
            }
        };
        run_hook(self.id(), Box::new(hook), &outcome);
    }

    /// Block the calling thread until the operation has settled.
    ///
    /// Must not be called from inside an operation that this one
    /// (transitively) depends on.
    pub fn wait_until_finished(&self) -> Outcome {
        let mut shared = self.shared();
        loop {
            if shared.settled {
                if let Some(outcome) = &shared.outcome {
                    return outcome.clone();
                }
            }
            shared = self
                .inner
                .settled
                .wait(shared)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`wait_until_finished`](Self::wait_until_finished) with an upper
    /// bound. Returns `None` on timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Outcome> {
        let deadline = Instant::now() + timeout;
        let mut shared = self.shared();
        loop {
            if shared.settled {
                if let Some(outcome) = &shared.outcome {
                    return Some(outcome.clone());
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            shared = match self.inner.settled.wait_timeout(shared, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Resolve once the operation has settled.
    pub async fn finished(&self) -> Outcome {
        loop {
            // Registered before the check so a settle in between still wakes us.
            let notified = self.inner.settled_notify.notified();
            {
                let shared = self.shared();
                if shared.settled {
                    if let Some(outcome) = &shared.outcome {
                        return outcome.clone();
                    }
                }
            }
            notified.await;
        }
    }

    /// Run the operation synchronously on the calling thread.
    ///
    /// This is the entry point for executors that drive operations
    /// themselves. Fails with [`SubGroupError::NotReady`] while a dependency
    /// is unsettled, and with [`SubGroupError::AlreadyStarted`] on a second
    /// call.
    pub fn start(&self) -> Result<Outcome> {
        match self.begin()? {
            Begin::Blocked(dependency) => Err(SubGroupError::NotReady {
                operation: self.id(),
                dependency: dependency.id(),
            }),
            Begin::Cancelled => Ok(Outcome::Cancelled),
            Begin::Run => {
                let outcome = self.run_body();
                self.complete(outcome.clone());
                Ok(outcome)
            }
        }
    }

    /// Claim the operation for a queue. A second claim fails.
    pub(crate) fn mark_enqueued(&self) -> Result<()> {
        if self.state() != OperationState::Pending {
            return Err(SubGroupError::AlreadyStarted(self.id()));
        }
        if self.inner.enqueued.swap(true, Ordering::AcqRel) {
            return Err(SubGroupError::AlreadyEnqueued(self.id()));
        }
        Ok(())
    }

    /// Undo [`mark_enqueued`](Self::mark_enqueued) when a batch is refused
    /// before any of it was registered.
    pub(crate) fn release_enqueued(&self) {
        self.inner.enqueued.store(false, Ordering::Release);
    }

    pub(crate) fn mark_ready(&self) {
        let mut shared = self.shared();
        if shared.state == OperationState::Pending {
            shared.state = OperationState::Ready;
        }
    }

    /// The first dependency that has not settled, if any.
    pub(crate) fn first_unfinished_dependency(&self) -> Option<Operation> {
        self.dependencies().into_iter().find(|d| !d.is_finished())
    }

    /// Try to move into `Executing`.
    pub(crate) fn begin(&self) -> Result<Begin> {
        loop {
            let dependencies = self.dependencies();
            if let Some(dependency) = dependencies.iter().find(|d| !d.is_finished()) {
                return Ok(Begin::Blocked(dependency.clone()));
            }

            let mut shared = self.shared();
            if shared.dependencies.len() != dependencies.len() {
                // An edge landed between the check and the lock.
                continue;
            }
            if !matches!(shared.state, OperationState::Pending | OperationState::Ready) {
                return Err(SubGroupError::AlreadyStarted(self.id()));
            }
            if self.is_cancelled() {
                drop(shared);
                self.complete(Outcome::Cancelled);
                return Ok(Begin::Cancelled);
            }

            shared.state = OperationState::Executing;
            return Ok(Begin::Run);
        }
    }

    /// Execute the body, turning errors and panics into [`Outcome::Failed`].
    pub(crate) fn run_body(&self) -> Outcome {
        let body = self
            .inner
            .body
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(body) = body else {
            return Outcome::Succeeded;
        };

        match panic::catch_unwind(AssertUnwindSafe(body)) {
            Ok(Ok(())) => Outcome::Succeeded,
            Ok(Err(err)) => Outcome::Failed(format!("{err:#}")),
            Err(payload) => Outcome::Failed(panic_message(payload.as_ref())),
        }
    }

    /// Settle with `outcome`. Returns `false` if already terminal.
    pub(crate) fn complete(&self, outcome: Outcome) -> bool {
        self.settle(outcome, true)
    }

    /// Settle as cancelled unless the body is already executing.
    pub(crate) fn abandon(&self) -> bool {
        self.cancel();
        self.settle(Outcome::Cancelled, false)
    }

    fn settle(&self, outcome: Outcome, allow_executing: bool) -> bool {
        let (hooks, dependencies) = {
            let mut shared = self.shared();
            if shared.state.is_terminal()
                || (!allow_executing && shared.state == OperationState::Executing)
            {
                return false;
            }
            shared.state = outcome.terminal_state();
            shared.outcome = Some(outcome.clone());
            (
                mem::take(&mut shared.hooks),
                mem::take(&mut shared.dependencies),
            )
        };
        drop(dependencies);

        // A cancelled body never runs; drop whatever it captured now.
        self.inner
            .body
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        for hook in hooks {
            run_hook(self.id(), hook, &outcome);
        }

        self.shared().settled = true;
        self.inner.settled.notify_all();
        self.inner.settled_notify.notify_waiters();

        debug!(op = %self.id(), ?outcome, "operation settled");
        true
    }

    /// Whether `target` is reachable through this operation's dependencies.
    fn depends_on(&self, target: &Operation) -> bool {
        let mut stack = self.dependencies();
        let mut visited = HashSet::new();

        while let Some(op) = stack.pop() {
            if op == *target {
                return true;
            }
            if visited.insert(op.id()) {
                stack.extend(op.dependencies());
            }
        }
        false
    }

    fn shared(&self) -> MutexGuard<'_, Shared> {
        self.inner
            .shared
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn run_hook(id: OperationId, hook: CompletionHook, outcome: &Outcome) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| hook(id, outcome))) {
        error!(
            op = %id,
            panic = %panic_message(payload.as_ref()),
            "completion hook panicked"
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "operation panicked".to_string()
    }
}

impl PartialEq for Operation {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Operation {}

impl Hash for Operation {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operation")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Builder for operations that carry a name for logging.
#[derive(Debug, Clone, Default)]
pub struct OperationBuilder {
    name: Option<String>,
}

impl OperationBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn build<F>(self, body: F) -> Operation
    where
        F: FnOnce() + Send + 'static,
    {
        self.build_fallible(move || {
            body();
            Ok(())
        })
    }

    pub fn build_fallible<F>(self, body: F) -> Operation
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        Operation::from_parts(self.name, Box::new(body))
    }
}

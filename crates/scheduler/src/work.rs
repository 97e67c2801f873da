//! Work items: opaque units of deferred computation and their shared status.
//!
//! A [`WorkItem`] owns the body and is consumed when it runs. Any number of
//! [`WorkHandle`]s can observe its [`WorkStatus`] from other threads.

use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Boxed body of a work item.
pub type WorkFn = Box<dyn FnOnce() -> anyhow::Result<()> + Send + 'static>;

/// Lifecycle status of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkStatus {
    /// Constructed, not yet handed to a scheduler.
    Created,
    /// Waiting on an external trigger before it may be scheduled.
    WaitingForActivation,
    /// Accepted into a pending queue.
    WaitingToRun,
    /// Body is executing.
    Running,
    /// Body returned `Ok`.
    Completed,
    /// Body returned `Err` or panicked.
    Faulted,
    /// Never started: rejected, abandoned or skipped after cancellation.
    Canceled,
}

impl WorkStatus {
    /// `Completed`, `Faulted` or `Canceled`.
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkStatus::Completed | WorkStatus::Faulted | WorkStatus::Canceled)
    }

    /// True when the item is already executing, queued, or pending activation.
    /// Such items must not be run synchronously by a caller.
    pub fn is_started_or_pending(self) -> bool {
        matches!(
            self,
            WorkStatus::Running | WorkStatus::WaitingToRun | WorkStatus::WaitingForActivation
        )
    }
}

impl fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkStatus::Created => "created",
            WorkStatus::WaitingForActivation => "waiting_for_activation",
            WorkStatus::WaitingToRun => "waiting_to_run",
            WorkStatus::Running => "running",
            WorkStatus::Completed => "completed",
            WorkStatus::Faulted => "faulted",
            WorkStatus::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

// ── Shared status cell ───────────────────────────────────────

#[derive(Debug)]
struct StatusCell {
    status: Mutex<WorkStatus>,
    changed: Condvar,
}

impl StatusCell {
    fn new(status: WorkStatus) -> Self {
        Self {
            status: Mutex::new(status),
            changed: Condvar::new(),
        }
    }

    // No user code runs while this lock is held, so a poisoned guard is still consistent.
    fn lock(&self) -> MutexGuard<'_, WorkStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn get(&self) -> WorkStatus {
        *self.lock()
    }

    fn set(&self, status: WorkStatus) {
        *self.lock() = status;
        self.changed.notify_all();
    }

    /// Move a not-yet-started item to `Canceled`. Returns false if it had
    /// already started or finished.
    fn cancel(&self) -> bool {
        let mut guard = self.lock();
        if guard.is_terminal() || *guard == WorkStatus::Running {
            return false;
        }
        *guard = WorkStatus::Canceled;
        drop(guard);
        self.changed.notify_all();
        true
    }

    fn wait_terminal(&self, timeout: Option<Duration>) -> Option<WorkStatus> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut guard = self.lock();
        while !guard.is_terminal() {
            match deadline {
                None => {
                    guard = self.changed.wait(guard).unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    guard = self
                        .changed
                        .wait_timeout(guard, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
        Some(*guard)
    }
}

// ── WorkItem ─────────────────────────────────────────────────

/// A unit of work submitted to a [`Scheduler`](crate::Scheduler).
///
/// Dropping an item that never ran marks it `Canceled`, so handles never
/// wait on work that was lost during shutdown.
pub struct WorkItem {
    id: Uuid,
    label: Option<String>,
    state: Arc<StatusCell>,
    body: Option<WorkFn>,
}

impl WorkItem {
    /// Wrap a fallible body.
    pub fn new<F>(body: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        Self {
            id: Uuid::new_v4(),
            label: None,
            state: Arc::new(StatusCell::new(WorkStatus::Created)),
            body: Some(Box::new(body)),
        }
    }

    /// Wrap an infallible action.
    pub fn from_fn<F>(action: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::new(move || {
            action();
            Ok(())
        })
    }

    /// Attach a human-readable label used in log events.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Mark the item as waiting for an external trigger. Such an item is
    /// never eligible for inline execution.
    pub fn pending_activation(self) -> Self {
        self.state.set(WorkStatus::WaitingForActivation);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn status(&self) -> WorkStatus {
        self.state.get()
    }

    /// A cloneable observer for this item's status.
    pub fn handle(&self) -> WorkHandle {
        WorkHandle {
            id: self.id,
            state: Arc::clone(&self.state),
        }
    }

    pub(crate) fn set_status(&self, status: WorkStatus) {
        self.state.set(status);
    }

    /// Take the body out, leaving the item spent.
    pub(crate) fn take_body(&mut self) -> Option<WorkFn> {
        self.body.take()
    }
}

impl Drop for WorkItem {
    fn drop(&mut self) {
        if self.body.is_some() {
            self.state.cancel();
        }
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

// ── WorkHandle ───────────────────────────────────────────────

/// Observer for a submitted [`WorkItem`].
#[derive(Debug, Clone)]
pub struct WorkHandle {
    id: Uuid,
    state: Arc<StatusCell>,
}

impl WorkHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn status(&self) -> WorkStatus {
        self.state.get()
    }

    pub fn is_finished(&self) -> bool {
        self.status().is_terminal()
    }

    /// Block until the item reaches a terminal status.
    pub fn wait(&self) -> WorkStatus {
        // Without a deadline the loop only exits on a terminal status.
        self.state.wait_terminal(None).unwrap_or(WorkStatus::Canceled)
    }

    /// Block until the item reaches a terminal status or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<WorkStatus> {
        self.state.wait_terminal(Some(timeout))
    }
}

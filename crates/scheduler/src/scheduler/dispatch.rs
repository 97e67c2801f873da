use std::sync::Arc;
use std::thread;

use chrono::Utc;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, info, warn};

use crate::cancel::CancellationToken;
use crate::error::SchedulerError;
use crate::provider::{execute, WorkerProvider};
use crate::work::{WorkItem, WorkStatus};

use super::core::Inner;
use super::metrics::SchedulerCounters;
use super::types::{inline_eligible, SchedulerState};
use super::Scheduler;

impl Scheduler {
    /// Queue `item` for dispatch. `None` is accepted as a no-op.
    ///
    /// The first accepted item starts the dispatcher thread. Once stopping
    /// has begun, submissions fail with [`SchedulerError::Closed`] and the
    /// item is marked canceled.
    pub fn submit(&self, item: impl Into<Option<WorkItem>>) -> Result<(), SchedulerError> {
        let Some(item) = item.into() else {
            return Ok(());
        };

        let mut inner = self.lock_inner();
        match inner.state {
            SchedulerState::Idle => self.start_dispatcher(&mut inner)?,
            SchedulerState::Dispatching => {}
            SchedulerState::Draining | SchedulerState::Stopped => {
                drop(inner);
                return Err(self.reject(item));
            }
        }

        let Some(sender) = inner.sender.as_ref() else {
            drop(inner);
            return Err(self.reject(item));
        };

        let work_id = item.id();
        item.set_status(WorkStatus::WaitingToRun);
        if let Err(mpsc::error::SendError(item)) = sender.send(item) {
            // Dispatcher is gone; nothing will ever consume the queue.
            drop(inner);
            return Err(self.reject(item));
        }
        self.counters.record_submitted();
        debug!(work_id = %work_id, "work item queued");
        Ok(())
    }

    /// Whether `item` may run synchronously on the caller's thread instead of
    /// being queued.
    pub fn can_run_inline<'a>(
        &self,
        item: impl Into<Option<&'a WorkItem>>,
        was_previously_queued: bool,
    ) -> bool {
        inline_eligible(item.into(), was_previously_queued)
    }

    /// Execute `item` on the caller's thread if [`can_run_inline`](Self::can_run_inline)
    /// allows it and the scheduler has not begun shutting down. Otherwise the
    /// item is handed back untouched.
    pub fn run_inline(&self, item: WorkItem, was_previously_queued: bool) -> Result<(), WorkItem> {
        if !self.can_run_inline(&item, was_previously_queued) {
            return Err(item);
        }
        if self.cancel.is_cancelled() || !self.state().accepts_work() {
            debug!(work_id = %item.id(), "scheduler shutting down, refusing inline execution");
            return Err(item);
        }
        debug!(work_id = %item.id(), "executing work item inline");
        execute(item, &self.cancel);
        self.counters.record_ran_inline();
        Ok(())
    }

    fn reject(&self, item: WorkItem) -> SchedulerError {
        self.counters.record_rejected();
        warn!(work_id = %item.id(), "scheduler closed, rejecting work item");
        item.set_status(WorkStatus::Canceled);
        SchedulerError::Closed
    }

    fn start_dispatcher(&self, inner: &mut Inner) -> Result<(), SchedulerError> {
        let Some(receiver) = inner.receiver.take() else {
            return Err(SchedulerError::Closed);
        };
        let provider = Arc::clone(&self.provider);
        let cancel = self.cancel.clone();
        let counters = Arc::clone(&self.counters);

        let spawned = thread::Builder::new()
            .name("spool-dispatcher".into())
            .spawn(move || dispatch_loop(receiver, provider, cancel, counters));

        match spawned {
            Ok(handle) => {
                inner.dispatcher = Some(handle);
                inner.dispatcher_started_at = Some(Utc::now());
                inner.state = SchedulerState::Dispatching;
                info!(provider = self.provider.name(), "dispatcher started");
                Ok(())
            }
            Err(e) => {
                // The receiver went down with the closure; nothing was queued yet.
                let (sender, receiver) = mpsc::unbounded_channel();
                inner.sender = Some(sender);
                inner.receiver = Some(receiver);
                Err(SchedulerError::Spawn(e))
            }
        }
    }
}

/// Sole consumer of the pending queue. Forwards items until the queue is
/// closed and empty, or until cancellation is observed.
fn dispatch_loop(
    mut receiver: UnboundedReceiver<WorkItem>,
    provider: Arc<dyn WorkerProvider>,
    cancel: CancellationToken,
    counters: Arc<SchedulerCounters>,
) {
    if cancel.is_cancelled() {
        abandon_remaining(&mut receiver, &counters);
        return;
    }
    info!(provider = provider.name(), "start scheduling");

    while let Some(item) = receiver.blocking_recv() {
        if cancel.is_cancelled() {
            abandon(item, &counters);
            break;
        }
        let work_id = item.id();
        match provider.run(item) {
            Ok(()) => counters.record_forwarded(),
            Err(e) => {
                counters.record_refused();
                warn!(work_id = %work_id, error = %e, "worker provider did not accept work item");
            }
        }
    }

    abandon_remaining(&mut receiver, &counters);
    info!(provider = provider.name(), "done scheduling");
}

fn abandon(item: WorkItem, counters: &SchedulerCounters) {
    counters.record_abandoned();
    debug!(work_id = %item.id(), "cancellation observed, abandoning queued work item");
    item.set_status(WorkStatus::Canceled);
}

fn abandon_remaining(receiver: &mut UnboundedReceiver<WorkItem>, counters: &SchedulerCounters) {
    receiver.close();
    let mut abandoned = 0usize;
    while let Ok(item) = receiver.try_recv() {
        abandon(item, counters);
        abandoned += 1;
    }
    if abandoned > 0 {
        warn!(abandoned, "dispatcher exited with queued work items, marked canceled");
    }
}

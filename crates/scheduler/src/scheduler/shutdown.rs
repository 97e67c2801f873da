use std::thread::JoinHandle;

use tracing::{error, info};

use super::types::SchedulerState;
use super::Scheduler;

impl Scheduler {
    /// Graceful shutdown. Idempotent.
    ///
    /// Closes the queue, lets the dispatcher forward everything already
    /// accepted, then stops the provider (which waits for outstanding units
    /// on backends that support it) and sets the cancellation signal.
    pub fn stop(&self) {
        let Some(dispatcher) = self.close_queue() else {
            return;
        };
        info!(provider = self.provider.name(), "stopping scheduler, draining queue");

        join_dispatcher(dispatcher);
        self.provider.stop();
        self.cancel.cancel();
        self.lock_inner().state = SchedulerState::Stopped;

        let m = self.metrics();
        info!(
            submitted = m.submitted,
            forwarded = m.forwarded,
            refused = m.refused,
            abandoned = m.abandoned,
            rejected = m.rejected,
            "scheduler stopped"
        );
    }

    /// Cancelling shutdown. Idempotent.
    ///
    /// Sets the cancellation signal before anything else, so queued items the
    /// dispatcher has not forwarded yet are abandoned and marked canceled.
    /// Units already running finish; units not yet entered are skipped.
    pub fn cancel(&self) {
        if self.cancel.cancel() {
            info!(provider = self.provider.name(), "cancellation signalled");
        }
        let Some(dispatcher) = self.close_queue() else {
            return;
        };

        self.provider.cancel();
        join_dispatcher(dispatcher);
        self.lock_inner().state = SchedulerState::Stopped;

        let m = self.metrics();
        info!(
            forwarded = m.forwarded,
            abandoned = m.abandoned,
            "scheduler cancelled"
        );
    }

    /// Move to `Draining` and drop the queue's only sender. Returns `None`
    /// when shutdown has already begun, otherwise the dispatcher handle if
    /// one was started.
    fn close_queue(&self) -> Option<Option<JoinHandle<()>>> {
        let mut inner = self.lock_inner();
        if !inner.state.accepts_work() {
            return None;
        }
        inner.state = SchedulerState::Draining;
        inner.sender = None;
        inner.receiver = None;
        Some(inner.dispatcher.take())
    }
}

fn join_dispatcher(dispatcher: Option<JoinHandle<()>>) {
    if let Some(handle) = dispatcher {
        if handle.join().is_err() {
            error!("dispatcher thread terminated abnormally");
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::types::SchedulerState;

/// Scheduler operational metrics.
#[derive(Debug, Clone, Serialize)]
pub struct SchedulerMetrics {
    /// Current lifecycle state.
    pub state: SchedulerState,
    /// Items accepted into the pending queue.
    pub submitted: u64,
    /// Submissions turned away because the scheduler was closed.
    pub rejected: u64,
    /// Items the worker provider accepted from the dispatcher.
    pub forwarded: u64,
    /// Items the worker provider refused, typically because it was stopped.
    pub refused: u64,
    /// Queued items dropped after cancellation was observed.
    pub abandoned: u64,
    /// Items executed synchronously through `run_inline`.
    pub ran_inline: u64,
    /// Accepted items not yet forwarded, refused or abandoned.
    pub pending: u64,
    /// When the dispatcher thread started, if it has.
    pub dispatcher_started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub(crate) struct SchedulerCounters {
    submitted: AtomicU64,
    rejected: AtomicU64,
    forwarded: AtomicU64,
    refused: AtomicU64,
    abandoned: AtomicU64,
    ran_inline: AtomicU64,
}

impl SchedulerCounters {
    pub(crate) fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_forwarded(&self) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_refused(&self) {
        self.refused.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_abandoned(&self) {
        self.abandoned.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_ran_inline(&self) {
        self.ran_inline.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(
        &self,
        state: SchedulerState,
        dispatcher_started_at: Option<DateTime<Utc>>,
    ) -> SchedulerMetrics {
        let submitted = self.submitted.load(Ordering::Relaxed);
        let forwarded = self.forwarded.load(Ordering::Relaxed);
        let refused = self.refused.load(Ordering::Relaxed);
        let abandoned = self.abandoned.load(Ordering::Relaxed);
        SchedulerMetrics {
            state,
            submitted,
            rejected: self.rejected.load(Ordering::Relaxed),
            forwarded,
            refused,
            abandoned,
            ran_inline: self.ran_inline.load(Ordering::Relaxed),
            pending: submitted.saturating_sub(forwarded + refused + abandoned),
            dispatcher_started_at,
        }
    }
}

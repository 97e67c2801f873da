use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use super::Outcome;

/// Provider operational metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProviderMetrics {
    /// Backend name.
    pub provider: String,
    /// Current size of the active execution set.
    pub active: usize,
    /// Execution contexts created.
    pub contexts_started: u64,
    /// Finished contexts removed from the active set.
    pub contexts_pruned: u64,
    /// Admissions that served the short penalty.
    pub short_penalties: u64,
    /// Admissions that served the long penalty.
    pub long_penalties: u64,
    /// Units whose body returned `Ok`.
    pub completed: u64,
    /// Units whose body failed or panicked.
    pub faulted: u64,
    /// Units skipped or rejected because of cancellation or shutdown.
    pub canceled: u64,
}

/// Lock-free counters shared between a provider and its contexts.
#[derive(Debug, Default)]
pub(crate) struct ProviderCounters {
    started: AtomicU64,
    pruned: AtomicU64,
    short_penalties: AtomicU64,
    long_penalties: AtomicU64,
    completed: AtomicU64,
    faulted: AtomicU64,
    canceled: AtomicU64,
}

impl ProviderCounters {
    pub(crate) fn record_started(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_pruned(&self, count: usize) {
        self.pruned.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_short_penalty(&self) {
        self.short_penalties.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_long_penalty(&self) {
        self.long_penalties.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.canceled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_outcome(&self, outcome: Outcome) {
        let counter = match outcome {
            Outcome::Completed => &self.completed,
            Outcome::Faulted => &self.faulted,
            Outcome::Canceled => &self.canceled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, provider: &str, active: usize) -> ProviderMetrics {
        ProviderMetrics {
            provider: provider.to_string(),
            active,
            contexts_started: self.started.load(Ordering::Relaxed),
            contexts_pruned: self.pruned.load(Ordering::Relaxed),
            short_penalties: self.short_penalties.load(Ordering::Relaxed),
            long_penalties: self.long_penalties.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            faulted: self.faulted.load(Ordering::Relaxed),
            canceled: self.canceled.load(Ordering::Relaxed),
        }
    }
}

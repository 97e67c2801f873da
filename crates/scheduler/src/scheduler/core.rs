use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use chrono::{DateTime, Utc};
use spool_core::PoolConfig;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::cancel::CancellationToken;
use crate::error::ProviderError;
use crate::provider::{build_provider, WorkerProvider};
use crate::work::WorkItem;

use super::metrics::{SchedulerCounters, SchedulerMetrics};
use super::types::SchedulerState;

/// The task scheduler. Single ingress point that queues work items and
/// forwards them, in submission order, to a [`WorkerProvider`] from one
/// dedicated dispatcher thread.
pub struct Scheduler {
    pub(super) provider: Arc<dyn WorkerProvider>,
    /// Set once during shutdown; observed by the dispatcher before each forward.
    pub(super) cancel: CancellationToken,
    pub(super) inner: Mutex<Inner>,
    pub(super) counters: Arc<SchedulerCounters>,
}

/// Queue endpoints and dispatcher bookkeeping, guarded by one lock.
pub(super) struct Inner {
    pub(super) state: SchedulerState,
    /// Dropping the only sender closes the queue for new entries.
    pub(super) sender: Option<UnboundedSender<WorkItem>>,
    /// Held until the dispatcher starts and takes ownership.
    pub(super) receiver: Option<UnboundedReceiver<WorkItem>>,
    pub(super) dispatcher: Option<JoinHandle<()>>,
    pub(super) dispatcher_started_at: Option<DateTime<Utc>>,
}

impl Inner {
    pub(super) fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            state: SchedulerState::Idle,
            sender: Some(sender),
            receiver: Some(receiver),
            dispatcher: None,
            dispatcher_started_at: None,
        }
    }
}

impl Scheduler {
    /// Create a scheduler forwarding to `provider`. The provider may be
    /// shared with other schedulers; stopping this scheduler stops it.
    pub fn new(provider: Arc<dyn WorkerProvider>) -> Self {
        Self {
            provider,
            cancel: CancellationToken::new(),
            inner: Mutex::new(Inner::new()),
            counters: Arc::new(SchedulerCounters::default()),
        }
    }

    /// Build the provider selected by `config` and wrap it.
    pub fn from_config(config: &PoolConfig) -> Result<Self, ProviderError> {
        Ok(Self::new(build_provider(config)?))
    }

    pub fn provider(&self) -> &Arc<dyn WorkerProvider> {
        &self.provider
    }

    pub fn state(&self) -> SchedulerState {
        self.lock_inner().state
    }

    /// Whether the scheduler's cancellation signal has been set.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn metrics(&self) -> SchedulerMetrics {
        let (state, started_at) = {
            let inner = self.lock_inner();
            (inner.state, inner.dispatcher_started_at)
        };
        self.counters.snapshot(state, started_at)
    }

    pub(super) fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

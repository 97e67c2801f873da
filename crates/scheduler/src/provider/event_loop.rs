//! Event-loop-backed provider.
//!
//! Units run as blocking workers on a provider-owned tokio runtime. Each
//! worker removes itself from the active set when it completes, under a lock
//! separate from the admission lock.
//!
//! Shutdown is best-effort: [`WorkerProvider::stop`] aborts workers that have
//! not started yet and releases the runtime without waiting for units that
//! are already executing. Use [`ThreadProvider`](super::ThreadProvider) when
//! stop must wait for outstanding work.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::admission::{self, AdmissionPolicy};
use super::metrics::{ProviderCounters, ProviderMetrics};
use super::{execute, Outcome, WorkerProvider};
use crate::cancel::CancellationToken;
use crate::error::ProviderError;
use crate::work::WorkItem;

const NAME: &str = "event_loop";

/// Tokio's default cap on blocking threads.
const DEFAULT_MAX_BLOCKING_THREADS: usize = 512;

type Registry = Arc<Mutex<HashMap<u64, JoinHandle<()>>>>;

fn lock_registry(registry: &Registry) -> MutexGuard<'_, HashMap<u64, JoinHandle<()>>> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A unit waiting for a blocking worker. Counted as canceled if the worker
/// is aborted or dropped with the runtime before it takes the item.
struct QueuedUnit {
    item: Option<WorkItem>,
    counters: Arc<ProviderCounters>,
}

impl QueuedUnit {
    fn run(mut self, cancel: &CancellationToken) {
        if let Some(item) = self.item.take() {
            let outcome = execute(item, cancel);
            self.counters.record_outcome(outcome);
        }
    }
}

impl Drop for QueuedUnit {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.counters.record_outcome(Outcome::Canceled);
            debug!(provider = NAME, work_id = %item.id(), "async worker dropped before start");
        }
    }
}

/// Worker provider backed by tokio blocking workers.
#[derive(Debug)]
pub struct EventLoopProvider {
    policy: Box<dyn AdmissionPolicy>,
    /// Serializes admission and the penalty sleep.
    admission: Mutex<()>,
    /// Active execution set; workers deregister themselves here.
    workers: Registry,
    runtime: Mutex<Option<Runtime>>,
    handle: Handle,
    stopped: AtomicBool,
    cancel: CancellationToken,
    counters: Arc<ProviderCounters>,
    next_id: AtomicU64,
}

impl EventLoopProvider {
    /// Build a provider with its own multi-threaded runtime.
    pub fn new(policy: impl AdmissionPolicy + 'static) -> Result<Self, ProviderError> {
        Self::with_max_blocking_threads(policy, DEFAULT_MAX_BLOCKING_THREADS)
    }

    /// Like [`new`](Self::new), capping how many units execute at once.
    /// Units beyond the cap wait in the runtime's blocking queue.
    pub fn with_max_blocking_threads(
        policy: impl AdmissionPolicy + 'static,
        max_blocking_threads: usize,
    ) -> Result<Self, ProviderError> {
        let runtime = Builder::new_multi_thread()
            .thread_name("spool-event-loop")
            .max_blocking_threads(max_blocking_threads.max(1))
            .enable_all()
            .build()
            .map_err(ProviderError::Runtime)?;
        let handle = runtime.handle().clone();
        Ok(Self {
            policy: Box::new(policy),
            admission: Mutex::new(()),
            workers: Arc::new(Mutex::new(HashMap::new())),
            runtime: Mutex::new(Some(runtime)),
            handle,
            stopped: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            counters: Arc::new(ProviderCounters::default()),
            next_id: AtomicU64::new(1),
        })
    }

    fn shutdown(&self) {
        if self.cancel.cancel() {
            info!(provider = NAME, "cancellation signalled to async workers");
        }
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        let workers: Vec<_> = lock_registry(&self.workers).drain().collect();
        info!(provider = NAME, workers = workers.len(), "stopping, cancelling async workers");
        for (_, worker) in workers {
            worker.abort();
        }

        let runtime = self
            .runtime
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(runtime) = runtime {
            runtime.shutdown_background();
        }
        info!(provider = NAME, "stopped");
    }
}

impl WorkerProvider for EventLoopProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn run(&self, item: WorkItem) -> Result<(), ProviderError> {
        let _admission = self.admission.lock().unwrap_or_else(PoisonError::into_inner);
        if self.stopped.load(Ordering::Acquire) {
            self.counters.record_rejected();
            warn!(provider = NAME, work_id = %item.id(), "provider stopped, rejecting work item");
            return Err(ProviderError::Stopped);
        }

        let live = self.active_count();
        admission::serve(self.policy.assess(live), NAME, live, &self.counters);

        // Hold the registry while spawning so the worker cannot deregister
        // before it has been registered.
        let mut registry = lock_registry(&self.workers);
        if self.stopped.load(Ordering::Acquire) {
            self.counters.record_rejected();
            warn!(provider = NAME, work_id = %item.id(), "provider stopped during admission, rejecting work item");
            return Err(ProviderError::Stopped);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let work_id = item.id();
        let cancel = self.cancel.clone();
        let unit = QueuedUnit {
            item: Some(item),
            counters: Arc::clone(&self.counters),
        };
        let workers = Arc::clone(&self.workers);
        let task = self.handle.spawn_blocking(move || {
            unit.run(&cancel);
            let mut registry = lock_registry(&workers);
            registry.remove(&id);
            debug!(provider = NAME, worker = id, live = registry.len(), "async worker completed");
        });

        registry.insert(id, task);
        self.counters.record_started();
        debug!(
            provider = NAME,
            worker = id,
            work_id = %work_id,
            live = registry.len(),
            "async worker started"
        );
        Ok(())
    }

    /// Best-effort: abort workers that have not started and release the
    /// runtime. Units already executing keep running detached.
    fn stop(&self) {
        self.shutdown();
    }

    /// Same as [`stop`](WorkerProvider::stop); workers always observe the
    /// cancellation signal at entry.
    fn cancel(&self) {
        self.shutdown();
    }

    fn active_count(&self) -> usize {
        lock_registry(&self.workers).len()
    }

    fn metrics(&self) -> ProviderMetrics {
        self.counters.snapshot(NAME, self.active_count())
    }
}

impl Drop for EventLoopProvider {
    fn drop(&mut self) {
        self.shutdown();
    }
}

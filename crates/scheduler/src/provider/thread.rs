//! Throttled thread-backed provider.
//!
//! Every unit gets a fresh, named OS thread. Before a thread is created the
//! caller passes admission control while holding the provider lock, so a
//! caller serving a penalty blocks every other caller of [`ThreadProvider::run`]
//! on the same instance. Finished threads are pruned lazily on the next run.

use std::io;
use std::mem;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::admission::{self, AdmissionPolicy};
use super::metrics::{ProviderCounters, ProviderMetrics};
use super::{execute, WorkerProvider};
use crate::cancel::CancellationToken;
use crate::error::ProviderError;
use crate::work::WorkItem;

const NAME: &str = "thread";

/// A running (or finished, not yet pruned) execution context.
#[derive(Debug)]
struct ExecutionContext {
    id: u64,
    handle: JoinHandle<()>,
}

#[derive(Debug, Default)]
struct ActiveSet {
    contexts: Vec<ExecutionContext>,
    stopped: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShutdownMode {
    Graceful,
    Cancel,
}

/// Worker provider that creates one dedicated thread per unit.
#[derive(Debug)]
pub struct ThreadProvider {
    policy: Box<dyn AdmissionPolicy>,
    /// Admission lock. Also guards the active set.
    active: Mutex<ActiveSet>,
    /// Mirror of the active set size, readable while a penalty is served.
    live: AtomicUsize,
    cancel: CancellationToken,
    counters: Arc<ProviderCounters>,
    next_id: AtomicU64,
}

impl ThreadProvider {
    pub fn new(policy: impl AdmissionPolicy + 'static) -> Self {
        Self {
            policy: Box::new(policy),
            active: Mutex::new(ActiveSet::default()),
            live: AtomicUsize::new(0),
            cancel: CancellationToken::new(),
            counters: Arc::new(ProviderCounters::default()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Remove finished contexts from the active set. Returns how many were removed.
    ///
    /// Waits for the admission lock, so it blocks while a penalty is served.
    pub fn prune_finished(&self) -> usize {
        let mut set = self.lock_active();
        self.prune(&mut set)
    }

    fn lock_active(&self) -> MutexGuard<'_, ActiveSet> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn prune(&self, set: &mut ActiveSet) -> usize {
        let before = set.contexts.len();
        set.contexts.retain(|ctx| !ctx.handle.is_finished());
        let removed = before - set.contexts.len();
        self.live.store(set.contexts.len(), Ordering::Release);
        if removed > 0 {
            self.counters.record_pruned(removed);
            warn!(
                provider = NAME,
                removed,
                live = set.contexts.len(),
                "pruned finished execution contexts from the active set"
            );
        }
        removed
    }

    /// The unit went down with the thread closure and is already canceled.
    fn spawn_failed(&self, work_id: Uuid, e: io::Error) -> ProviderError {
        self.counters.record_rejected();
        error!(provider = NAME, work_id = %work_id, error = %e, "failed to spawn execution context");
        ProviderError::Spawn(e)
    }

    fn shutdown(&self, mode: ShutdownMode) {
        if mode == ShutdownMode::Cancel && self.cancel.cancel() {
            info!(provider = NAME, "cancellation signalled to execution contexts");
        }

        let contexts = {
            let mut set = self.lock_active();
            if set.stopped {
                return;
            }
            set.stopped = true;
            self.live.store(0, Ordering::Release);
            mem::take(&mut set.contexts)
        };

        info!(provider = NAME, contexts = contexts.len(), ?mode, "stopping, joining execution contexts");
        for ctx in contexts {
            if ctx.handle.join().is_err() {
                error!(provider = NAME, context = ctx.id, "execution context terminated abnormally");
            }
        }

        self.cancel.cancel();
        info!(provider = NAME, "stopped");
    }
}

impl WorkerProvider for ThreadProvider {
    fn name(&self) -> &str {
        NAME
    }

    fn run(&self, item: WorkItem) -> Result<(), ProviderError> {
        let mut set = self.lock_active();
        if set.stopped {
            self.counters.record_rejected();
            warn!(provider = NAME, work_id = %item.id(), "provider stopped, rejecting work item");
            return Err(ProviderError::Stopped);
        }

        let live = set.contexts.len();
        admission::serve(self.policy.assess(live), NAME, live, &self.counters);
        self.prune(&mut set);

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = self.cancel.clone();
        let counters = Arc::clone(&self.counters);
        let work_id = item.id();
        let spawned = thread::Builder::new()
            .name(format!("spool-worker-{id}"))
            .spawn(move || {
                let outcome = execute(item, &cancel);
                counters.record_outcome(outcome);
            });

        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => return Err(self.spawn_failed(work_id, e)),
        };

        set.contexts.push(ExecutionContext { id, handle });
        self.live.store(set.contexts.len(), Ordering::Release);
        self.counters.record_started();
        debug!(
            provider = NAME,
            context = id,
            work_id = %work_id,
            live = set.contexts.len(),
            "execution context started"
        );
        Ok(())
    }

    /// Join every outstanding context, letting each run its unit, then
    /// set the cancellation signal.
    fn stop(&self) {
        self.shutdown(ShutdownMode::Graceful);
    }

    /// Set the cancellation signal, then join every outstanding context.
    fn cancel(&self) {
        self.shutdown(ShutdownMode::Cancel);
    }

    fn active_count(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    fn metrics(&self) -> ProviderMetrics {
        self.counters.snapshot(NAME, self.active_count())
    }
}

impl Drop for ThreadProvider {
    fn drop(&mut self) {
        self.shutdown(ShutdownMode::Graceful);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::RwLock;
    use std::time::{Duration, Instant};

    use super::*;
    use crate::provider::ThresholdPolicy;
    use crate::work::WorkStatus;

    const WAIT: Duration = Duration::from_secs(10);

    fn fast_policy(slow_down: usize, slow_even_more: usize) -> ThresholdPolicy {
        ThresholdPolicy::new(
            slow_down,
            slow_even_more,
            Duration::from_millis(1),
            Duration::from_millis(5),
        )
    }

    /// Unit that stays alive until the test drops the gate's write guard.
    fn gated_unit(gate: &Arc<RwLock<()>>) -> WorkItem {
        let gate = Arc::clone(gate);
        WorkItem::from_fn(move || {
            let _open = gate.read();
        })
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + WAIT;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn runs_unit_on_dedicated_thread() {
        let provider = ThreadProvider::new(fast_policy(5, 10));
        let (tx, rx) = std::sync::mpsc::channel();
        let item = WorkItem::from_fn(move || {
            let name = thread::current().name().map(str::to_string);
            tx.send(name).ok();
        });
        let handle = item.handle();

        provider.run(item).unwrap();
        assert_eq!(handle.wait_timeout(WAIT), Some(WorkStatus::Completed));
        let name = rx.recv_timeout(WAIT).unwrap().unwrap();
        assert!(name.starts_with("spool-worker-"));
        provider.stop();
    }

    #[test]
    fn thresholds_trigger_short_then_long_penalty() {
        let provider = ThreadProvider::new(fast_policy(5, 10));
        let gate = Arc::new(RwLock::new(()));
        let closed = gate.write().unwrap();

        for _ in 0..12 {
            provider.run(gated_unit(&gate)).unwrap();
        }
        let m = provider.metrics();
        assert_eq!(m.active, 12);
        // Runs 7..=11 see 6..=10 live contexts; run 12 sees 11.
        assert_eq!(m.short_penalties, 5);
        assert_eq!(m.long_penalties, 1);
        assert_eq!(m.contexts_pruned, 0);

        drop(closed);
        provider.stop();
        assert_eq!(provider.metrics().completed, 12);
    }

    #[test]
    fn penalty_blocks_concurrent_admission() {
        let provider = Arc::new(ThreadProvider::new(ThresholdPolicy::new(
            1,
            100,
            Duration::from_millis(200),
            Duration::from_secs(20),
        )));
        let gate = Arc::new(RwLock::new(()));
        let closed = gate.write().unwrap();
        provider.run(gated_unit(&gate)).unwrap();
        provider.run(gated_unit(&gate)).unwrap();

        // Third run pays the 200ms penalty while holding the admission lock.
        let p = Arc::clone(&provider);
        let g = Arc::clone(&gate);
        let penalised = thread::spawn(move || p.run(gated_unit(&g)).unwrap());
        assert!(wait_until(|| provider.metrics().short_penalties == 1));

        // Waits out the rest of that penalty, then serves its own.
        let started = Instant::now();
        provider.run(gated_unit(&gate)).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(250));
        assert_eq!(provider.metrics().short_penalties, 2);
        penalised.join().unwrap();

        drop(closed);
        provider.stop();
    }

    #[test]
    fn finished_contexts_are_pruned_on_next_run() {
        let provider = ThreadProvider::new(fast_policy(5, 10));
        let first = WorkItem::from_fn(|| {});
        let handle = first.handle();
        provider.run(first).unwrap();
        assert_eq!(handle.wait_timeout(WAIT), Some(WorkStatus::Completed));
        assert!(wait_until(|| {
            let set = provider.lock_active();
            set.contexts.iter().all(|ctx| ctx.handle.is_finished())
        }));

        provider.run(WorkItem::from_fn(|| {})).unwrap();
        assert_eq!(provider.metrics().contexts_pruned, 1);
        provider.stop();
    }

    #[test]
    fn faulting_unit_does_not_block_later_units() {
        let provider = ThreadProvider::new(fast_policy(5, 10));
        let faulty = WorkItem::from_fn(|| panic!("unit exploded"));
        let faulty_handle = faulty.handle();
        provider.run(faulty).unwrap();
        assert_eq!(faulty_handle.wait_timeout(WAIT), Some(WorkStatus::Faulted));
        assert!(wait_until(|| {
            provider.prune_finished();
            provider.active_count() == 0
        }));

        let count = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..3)
            .map(|_| {
                let c = Arc::clone(&count);
                let item = WorkItem::from_fn(move || {
                    c.fetch_add(1, Ordering::SeqCst);
                });
                let h = item.handle();
                provider.run(item).unwrap();
                h
            })
            .collect();
        for h in handles {
            assert_eq!(h.wait_timeout(WAIT), Some(WorkStatus::Completed));
        }
        assert_eq!(count.load(Ordering::SeqCst), 3);

        provider.stop();
        let m = provider.metrics();
        assert_eq!(m.faulted, 1);
        assert_eq!(m.completed, 3);
    }

    #[test]
    fn stop_joins_outstanding_contexts() {
        let provider = ThreadProvider::new(fast_policy(5, 10));
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            let d = Arc::clone(&done);
            provider
                .run(WorkItem::from_fn(move || {
                    thread::sleep(Duration::from_millis(30));
                    d.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap();
        }

        provider.stop();
        assert_eq!(done.load(Ordering::SeqCst), 4);
        assert_eq!(provider.active_count(), 0);
    }

    #[test]
    fn stop_is_idempotent_and_rejects_new_work() {
        let provider = ThreadProvider::new(fast_policy(5, 10));
        provider.stop();
        provider.stop();

        let item = WorkItem::from_fn(|| {});
        let handle = item.handle();
        assert!(matches!(provider.run(item), Err(ProviderError::Stopped)));
        assert_eq!(handle.status(), WorkStatus::Canceled);
        assert_eq!(provider.metrics().canceled, 1);
        assert_eq!(provider.active_count(), 0);
    }

    #[test]
    fn spawn_failure_counts_as_canceled() {
        let provider = ThreadProvider::new(fast_policy(5, 10));
        let err = provider.spawn_failed(
            Uuid::new_v4(),
            io::Error::new(io::ErrorKind::Other, "thread limit reached"),
        );
        assert!(matches!(err, ProviderError::Spawn(_)));

        let m = provider.metrics();
        assert_eq!(m.canceled, 1);
        assert_eq!(m.contexts_started, 0);
        assert_eq!(provider.active_count(), 0);
        provider.stop();
    }

    #[test]
    fn cancel_joins_and_sets_signal() {
        let provider = ThreadProvider::new(fast_policy(5, 10));
        let (release, released) = std::sync::mpsc::channel::<()>();
        let item = WorkItem::from_fn(move || {
            released.recv().ok();
        });
        let handle = item.handle();
        provider.run(item).unwrap();
        assert!(wait_until(|| handle.status() == WorkStatus::Running));

        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            release.send(()).ok();
        });
        provider.cancel();
        releaser.join().unwrap();

        // Already running, so the unit finishes normally.
        assert_eq!(handle.status(), WorkStatus::Completed);
        assert!(provider.cancel.is_cancelled());
        assert_eq!(provider.active_count(), 0);
    }
}

//! Worker providers: the backends that turn a [`WorkItem`] into a running
//! execution context.
//!
//! Two interchangeable backends implement [`WorkerProvider`]:
//! - [`ThreadProvider`]: one OS thread per unit, lazy pruning, joining stop
//! - [`EventLoopProvider`]: tokio blocking workers, eager self-removal,
//!   best-effort stop
//!
//! Both gate context creation through an [`AdmissionPolicy`].

pub mod admission;
pub mod event_loop;
pub mod metrics;
pub mod thread;

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use spool_core::{PoolConfig, ProviderKind};
use tracing::{debug, error};

use crate::cancel::CancellationToken;
use crate::error::ProviderError;
use crate::work::{WorkItem, WorkStatus};

pub use admission::{Admission, AdmissionPolicy, Penalty, ThresholdPolicy};
pub use event_loop::EventLoopProvider;
pub use metrics::ProviderMetrics;
pub use thread::ThreadProvider;

/// Capability contract for an execution backend.
pub trait WorkerProvider: Send + Sync {
    /// Backend name for logs and metrics.
    fn name(&self) -> &str;

    /// Hand `item` to a new execution context.
    ///
    /// Blocks the caller at most for the admission penalty. Fails with
    /// [`ProviderError::Stopped`] once the provider has been stopped.
    fn run(&self, item: WorkItem) -> Result<(), ProviderError>;

    /// Orderly shutdown. Idempotent.
    fn stop(&self);

    /// Signal cancellation first, then shut down. Contexts that have not
    /// reached their entry check skip their unit. Idempotent.
    fn cancel(&self);

    /// Current size of the active execution set.
    fn active_count(&self) -> usize;

    fn metrics(&self) -> ProviderMetrics;
}

/// Build the backend selected by `config.provider`.
pub fn build_provider(config: &PoolConfig) -> Result<Arc<dyn WorkerProvider>, ProviderError> {
    config.validate()?;
    let policy = ThresholdPolicy::from_config(config);
    let provider: Arc<dyn WorkerProvider> = match config.provider {
        ProviderKind::Thread => Arc::new(ThreadProvider::new(policy)),
        ProviderKind::EventLoop => Arc::new(EventLoopProvider::new(policy)?),
    };
    Ok(provider)
}

// ── Execution context boundary ───────────────────────────────

/// How a single unit ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Completed,
    Faulted,
    Canceled,
}

/// Run one unit at an execution-context entry point.
///
/// Checks `cancel` once before starting. Errors and panics from the body are
/// logged here and never propagate to the context.
pub(crate) fn execute(mut item: WorkItem, cancel: &CancellationToken) -> Outcome {
    let id = item.id();
    if cancel.is_cancelled() {
        debug!(work_id = %id, "cancellation observed at entry, skipping work item");
        item.set_status(WorkStatus::Canceled);
        return Outcome::Canceled;
    }
    let Some(body) = item.take_body() else {
        return Outcome::Canceled;
    };

    item.set_status(WorkStatus::Running);
    let outcome = match panic::catch_unwind(AssertUnwindSafe(body)) {
        Ok(Ok(())) => Outcome::Completed,
        Ok(Err(e)) => {
            error!(work_id = %id, label = ?item.label(), error = %format!("{e:#}"), "work item failed");
            Outcome::Faulted
        }
        Err(payload) => {
            error!(
                work_id = %id,
                label = ?item.label(),
                panic = %panic_message(payload.as_ref()),
                "work item panicked"
            );
            Outcome::Faulted
        }
    };
    item.set_status(match outcome {
        Outcome::Completed => WorkStatus::Completed,
        Outcome::Faulted => WorkStatus::Faulted,
        Outcome::Canceled => WorkStatus::Canceled,
    });
    outcome
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn execute_completes_ok_body() {
        let runs = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&runs);
        let item = WorkItem::from_fn(move || {
            r.fetch_add(1, Ordering::SeqCst);
        });
        let handle = item.handle();

        assert_eq!(execute(item, &CancellationToken::new()), Outcome::Completed);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(handle.status(), WorkStatus::Completed);
    }

    #[test]
    fn execute_reports_error_as_fault() {
        let item = WorkItem::new(|| anyhow::bail!("disk full"));
        let handle = item.handle();
        assert_eq!(execute(item, &CancellationToken::new()), Outcome::Faulted);
        assert_eq!(handle.status(), WorkStatus::Faulted);
    }

    #[test]
    fn execute_contains_panics() {
        let item = WorkItem::from_fn(|| panic!("boom"));
        let handle = item.handle();
        assert_eq!(execute(item, &CancellationToken::new()), Outcome::Faulted);
        assert_eq!(handle.status(), WorkStatus::Faulted);
    }

    #[test]
    fn execute_skips_when_cancelled() {
        let runs = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&runs);
        let item = WorkItem::from_fn(move || {
            r.fetch_add(1, Ordering::SeqCst);
        });
        let handle = item.handle();
        let token = CancellationToken::new();
        token.cancel();

        assert_eq!(execute(item, &token), Outcome::Canceled);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(handle.status(), WorkStatus::Canceled);
    }

    #[test]
    fn panic_message_extracts_strings() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let borrowed: Box<dyn Any + Send> = Box::new("borrowed");
        let other: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(owned.as_ref()), "owned");
        assert_eq!(panic_message(borrowed.as_ref()), "borrowed");
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }

    #[test]
    fn build_provider_selects_backend() {
        let config = PoolConfig::with_thresholds(2, 4);
        let provider = build_provider(&config).unwrap();
        assert_eq!(provider.name(), "thread");
        provider.stop();

        let provider = build_provider(&config.clone().provider(ProviderKind::EventLoop)).unwrap();
        assert_eq!(provider.name(), "event_loop");
        provider.stop();
    }

    #[test]
    fn build_provider_rejects_invalid_config() {
        let err = build_provider(&PoolConfig::with_thresholds(4, 2)).err().unwrap();
        assert!(matches!(err, ProviderError::Config(_)));
    }
}

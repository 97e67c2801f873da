use spool_core::ConfigError;
use thiserror::Error;

/// Errors returned by a [`WorkerProvider`](crate::WorkerProvider).
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("worker provider has been stopped")]
    Stopped,

    #[error("failed to spawn execution context: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("failed to build event loop runtime: {0}")]
    Runtime(#[source] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors returned by the [`Scheduler`](crate::Scheduler).
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler is closed for new work")]
    Closed,

    #[error("failed to start dispatcher thread: {0}")]
    Spawn(#[source] std::io::Error),
}

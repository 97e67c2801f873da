pub mod cancel;
pub mod error;
pub mod provider;
pub mod scheduler;
pub mod work;

pub use cancel::CancellationToken;
pub use error::{ProviderError, SchedulerError};
pub use provider::{
    build_provider, Admission, AdmissionPolicy, EventLoopProvider, Penalty, ProviderMetrics,
    ThreadProvider, ThresholdPolicy, WorkerProvider,
};
pub use scheduler::{inline_eligible, Scheduler, SchedulerMetrics, SchedulerState};
pub use spool_core::{PoolConfig, ProviderKind};
pub use work::{WorkFn, WorkHandle, WorkItem, WorkStatus};

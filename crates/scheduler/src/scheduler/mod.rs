//! The task scheduler: a FIFO pending queue drained by one dedicated
//! dispatcher thread that forwards each item exactly once to a
//! [`WorkerProvider`](crate::provider::WorkerProvider).
//!
//! Split across files:
//! - `core`: struct definition, constructors, accessors
//! - `dispatch`: submission, dispatcher loop, inline execution
//! - `shutdown`: graceful stop, cancel, drop

mod core;
mod dispatch;
pub mod metrics;
mod shutdown;
pub mod types;


pub use self::core::Scheduler;
pub use metrics::SchedulerMetrics;
pub use types::{inline_eligible, SchedulerState};

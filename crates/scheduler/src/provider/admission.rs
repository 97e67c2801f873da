//! Admission control: how much a caller is delayed before a new execution
//! context is created, given the current live-context count.

use std::fmt;
use std::thread;
use std::time::Duration;

use spool_core::PoolConfig;
use tracing::warn;

use super::metrics::ProviderCounters;

/// Which penalty tier a delayed admission falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Penalty {
    SlowDown,
    SlowEvenMore,
}

/// Outcome of assessing one admission request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Create the context right away.
    Immediate,
    /// Sleep `delay` first. `threshold` is the limit that was exceeded.
    Delay {
        penalty: Penalty,
        delay: Duration,
        threshold: usize,
    },
}

/// Policy consulted by providers before every new execution context.
///
/// Growth is only slowed, never capped: a policy decides how long a caller
/// waits, not whether the context is created.
pub trait AdmissionPolicy: Send + Sync + fmt::Debug {
    fn assess(&self, live: usize) -> Admission;
}

/// Two-threshold delay policy.
///
/// Strictly more than `slow_down_threshold` live contexts costs the short
/// penalty; strictly more than `slow_even_more_threshold` costs the long one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdPolicy {
    slow_down_threshold: usize,
    slow_even_more_threshold: usize,
    slow_down_penalty: Duration,
    slow_even_more_penalty: Duration,
}

impl ThresholdPolicy {
    pub fn new(
        slow_down_threshold: usize,
        slow_even_more_threshold: usize,
        slow_down_penalty: Duration,
        slow_even_more_penalty: Duration,
    ) -> Self {
        Self {
            slow_down_threshold,
            slow_even_more_threshold,
            slow_down_penalty,
            slow_even_more_penalty,
        }
    }

    pub fn from_config(config: &PoolConfig) -> Self {
        Self::new(
            config.slow_down_threshold,
            config.slow_even_more_threshold,
            config.slow_down_penalty(),
            config.slow_even_more_penalty(),
        )
    }
}

impl AdmissionPolicy for ThresholdPolicy {
    fn assess(&self, live: usize) -> Admission {
        if live > self.slow_even_more_threshold {
            Admission::Delay {
                penalty: Penalty::SlowEvenMore,
                delay: self.slow_even_more_penalty,
                threshold: self.slow_even_more_threshold,
            }
        } else if live > self.slow_down_threshold {
            Admission::Delay {
                penalty: Penalty::SlowDown,
                delay: self.slow_down_penalty,
                threshold: self.slow_down_threshold,
            }
        } else {
            Admission::Immediate
        }
    }
}

/// Serve the penalty on the calling thread, if any.
pub(crate) fn serve(admission: Admission, provider: &str, live: usize, counters: &ProviderCounters) {
    let Admission::Delay { penalty, delay, threshold } = admission else {
        return;
    };
    match penalty {
        Penalty::SlowDown => {
            counters.record_short_penalty();
            warn!(
                provider,
                live,
                threshold,
                penalty_ms = delay.as_millis() as u64,
                "live contexts above slow-down threshold, applying slow-down penalty"
            );
        }
        Penalty::SlowEvenMore => {
            counters.record_long_penalty();
            warn!(
                provider,
                live,
                threshold,
                penalty_ms = delay.as_millis() as u64,
                "live contexts above slow-even-more threshold, applying slow-even-more penalty"
            );
        }
    }
    thread::sleep(delay);
}

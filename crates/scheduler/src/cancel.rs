use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One-shot cooperative cancellation flag.
///
/// Clones share the same flag. Once set it stays set; holders check it at
/// their own entry points and are never interrupted mid-work.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag. Returns true only for the call that actually set it.
    pub fn cancel(&self) -> bool {
        !self.cancelled.swap(true, Ordering::AcqRel)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

//! Cooperative cancellation for long-running GC passes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{GcError, GcResult};

/// Shared cancellation flag, checked between GC steps.
///
/// Cloning yields another view of the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Creates a fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation; every clone observes it.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// True once cancellation was requested.
    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Returns `Err(Canceled)` once cancellation was requested.
    pub fn check(&self) -> GcResult<()> {
        if self.is_canceled() {
            return Err(GcError::Canceled);
        }
        Ok(())
    }
}

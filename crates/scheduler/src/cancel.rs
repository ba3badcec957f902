//! Cooperative shutdown signal for the index worker
//!
//! The scheduler hands the same token to the worker loop and to the executor
//! running the in-flight task. Cancelling it stops the loop before the next
//! dequeue; executors that support cooperative cancellation can poll it too.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Cancellation token shared between the scheduler, its worker and the executor
///
/// Multiple clones share the same underlying state via `Arc`.
///
/// # Example
///
/// ```
/// use annotation_index_scheduler::CancellationToken;
///
/// let token = CancellationToken::new();
/// let executor_token = token.clone();
///
/// // In a long-running executor:
/// // for chunk in document.chunks() {
/// //     if executor_token.is_cancelled() {
/// //         return;
/// //     }
/// //     index(chunk);
/// // }
///
/// token.cancel();
/// assert!(executor_token.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new token in the non-cancelled state
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cancel this token and every clone of it
    ///
    /// Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

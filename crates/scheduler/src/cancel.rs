//! Cooperative cancellation for in-flight stroke jobs.
//!
//! The queue never terminates a running job. When a stroke is cancelled its
//! token is tripped, and every job already handed to the worker pool can
//! observe that and bail out early.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Cancellation token shared by a stroke and all of its dispatched jobs.
///
/// # Example
///
/// ```
/// use canvas_editor_scheduler::CancellationToken;
///
/// let token = CancellationToken::new();
/// let job_token = token.clone();
///
/// // Inside a long-running job:
/// // for row in rows {
/// //     if job_token.is_cancelled() {
/// //         return;
/// //     }
/// //     // ... process row ...
/// // }
///
/// token.cancel();
/// assert!(job_token.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new token in the non-cancelled state.
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Trip the token.
    ///
    /// All clones observe the cancellation. Calling it again is a no-op.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Check whether the owning stroke has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

//! Activity execution context

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Context provided to an activity attempt
///
/// Carries attempt bookkeeping and a cooperative cancellation flag. The flag
/// is only consulted at points the activity chooses to check it; an in-flight
/// attempt is never preempted.
#[derive(Debug, Clone)]
pub struct ActivityContext {
    /// Workflow instance that owns this activity
    pub workflow_id: String,

    /// Activity id within the workflow
    pub activity_id: String,

    /// Current attempt number (1-based)
    pub attempt: u32,

    /// Maximum attempts allowed by the retry policy
    pub max_attempts: u32,

    cancelled: Arc<AtomicBool>,
}

impl ActivityContext {
    /// Create a new context
    pub fn new(
        workflow_id: impl Into<String>,
        activity_id: impl Into<String>,
        attempt: u32,
        max_attempts: u32,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            activity_id: activity_id.into(),
            attempt,
            max_attempts,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether this is the final allowed attempt
    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Handle that can flag this attempt for cancellation
    pub fn cancellation_handle(&self) -> CancellationHandle {
        CancellationHandle {
            cancelled: self.cancelled.clone(),
        }
    }
}

/// Cooperative cancellation flag for one activity attempt
#[derive(Debug, Clone)]
pub struct CancellationHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancellationHandle {
    /// Request cancellation
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

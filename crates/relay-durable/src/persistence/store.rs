//! WorkflowStore trait definition

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::activity::ActivityError;
use crate::workflow::{ActivityOptions, WorkflowError, WorkflowEvent, WorkflowSignal};

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Workflow not found
    #[error("workflow not found: {0}")]
    WorkflowNotFound(String),

    /// Workflow already exists (idempotent-start guard)
    #[error("workflow already exists: {0}")]
    WorkflowExists(String),

    /// Task not found
    #[error("task not found: {0}")]
    TaskNotFound(Uuid),

    /// Optimistic concurrency check failed
    #[error("concurrency conflict: expected sequence {expected}, got {actual}")]
    ConcurrencyConflict { expected: i32, actual: i32 },

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Workflow instance status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Instance is live
    Running,

    /// Instance completed successfully
    Completed,

    /// Instance failed
    Failed,

    /// Instance was cancelled
    Cancelled,
}

impl WorkflowStatus {
    /// Whether this status ends the instance
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Activity task status in the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Claimed,
    Completed,
    Failed,
}

/// Definition of an activity task to enqueue
#[derive(Debug, Clone)]
pub struct TaskDefinition {
    pub workflow_id: String,
    pub activity_id: String,
    pub activity_type: String,
    pub input: serde_json::Value,
    pub options: ActivityOptions,
}

/// A task claimed by a worker for one execution attempt
#[derive(Debug, Clone)]
pub struct ClaimedTask {
    pub id: Uuid,
    pub workflow_id: String,
    pub activity_id: String,
    pub activity_type: String,
    pub input: serde_json::Value,
    pub options: ActivityOptions,
    /// Attempt number for this execution (1-based)
    pub attempt: u32,
}

/// Outcome of recording a task failure
#[derive(Debug, Clone)]
pub enum TaskFailureOutcome {
    /// The task was requeued for another attempt
    WillRetry { next_attempt: u32, delay: Duration },

    /// No more attempts; the failure is final for this activity
    ExhaustedRetries,
}

/// A durable timer row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerEntry {
    pub workflow_id: String,
    pub timer_id: String,
    pub fire_at: DateTime<Utc>,
}

/// Workflow instance row
#[derive(Debug, Clone)]
pub struct WorkflowInfo {
    pub id: String,
    pub workflow_type: String,
    pub status: WorkflowStatus,
    pub input: serde_json::Value,
    pub result: Option<serde_json::Value>,
    pub error: Option<WorkflowError>,
    /// Continuation generation counter; survives history resets
    pub run_count: u32,
}

/// Store for workflow instances, events, activity tasks, timers and signals
///
/// Implementations must be safe for concurrent access from the executor, the
/// worker pool and the timer service.
#[async_trait]
pub trait WorkflowStore: Send + Sync + 'static {
    // =========================================================================
    // Workflow operations
    // =========================================================================

    /// Create a new workflow instance in Running status
    ///
    /// Returns [`StoreError::WorkflowExists`] if the id is taken; the caller
    /// treats that as an idempotent no-op.
    async fn create_workflow(
        &self,
        workflow_id: &str,
        workflow_type: &str,
        input: serde_json::Value,
    ) -> Result<(), StoreError>;

    /// Get workflow status
    async fn get_workflow_status(&self, workflow_id: &str) -> Result<WorkflowStatus, StoreError>;

    /// Get the full workflow row
    async fn get_workflow_info(&self, workflow_id: &str) -> Result<WorkflowInfo, StoreError>;

    /// Append events with an optimistic concurrency check
    ///
    /// `expected_sequence` is the current history length; returns the new one.
    async fn append_events(
        &self,
        workflow_id: &str,
        expected_sequence: i32,
        events: Vec<WorkflowEvent>,
    ) -> Result<i32, StoreError>;

    /// Load the full event history, in sequence order
    async fn load_events(
        &self,
        workflow_id: &str,
    ) -> Result<Vec<(i32, WorkflowEvent)>, StoreError>;

    /// Update workflow status (with result or error on terminal transitions)
    async fn update_workflow_status(
        &self,
        workflow_id: &str,
        status: WorkflowStatus,
        result: Option<serde_json::Value>,
        error: Option<WorkflowError>,
    ) -> Result<(), StoreError>;

    /// Reset an instance for continue-as-new
    ///
    /// Truncates the event history, drops pending timers, unprocessed signals
    /// and unclaimed tasks, replaces the input, increments `run_count`, and
    /// leaves the instance Running. Identity and the run counter are the only
    /// state that survives.
    async fn reset_workflow(
        &self,
        workflow_id: &str,
        input: serde_json::Value,
    ) -> Result<(), StoreError>;

    // =========================================================================
    // Activity task queue
    // =========================================================================

    /// Enqueue an activity task
    async fn enqueue_task(&self, task: TaskDefinition) -> Result<Uuid, StoreError>;

    /// Claim up to `limit` due tasks for execution
    ///
    /// A task is due when it is Pending and its `next_attempt_at` has passed.
    /// Claiming is atomic: no two workers receive the same task.
    async fn claim_due_tasks(
        &self,
        worker_id: &str,
        limit: usize,
    ) -> Result<Vec<ClaimedTask>, StoreError>;

    /// Complete a claimed task
    async fn complete_task(
        &self,
        task_id: Uuid,
        result: serde_json::Value,
    ) -> Result<(), StoreError>;

    /// Record a task failure
    ///
    /// Consults the task's retry policy: a retryable error with attempts
    /// remaining requeues the task with the backoff delay; otherwise the
    /// failure is final. Non-retryable errors are final regardless of
    /// remaining attempts.
    async fn fail_task(
        &self,
        task_id: Uuid,
        error: &ActivityError,
    ) -> Result<TaskFailureOutcome, StoreError>;

    // =========================================================================
    // Durable timers
    // =========================================================================

    /// Schedule (or reschedule) a timer
    async fn schedule_timer(
        &self,
        workflow_id: &str,
        timer_id: &str,
        fire_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Cancel one pending timer; unknown timers are a no-op
    async fn cancel_timer(&self, workflow_id: &str, timer_id: &str) -> Result<(), StoreError>;

    /// Cancel all pending timers for an instance
    async fn cancel_workflow_timers(&self, workflow_id: &str) -> Result<(), StoreError>;

    /// Atomically remove and return timers due at `now`
    async fn claim_due_timers(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TimerEntry>, StoreError>;

    /// Pending timers for one instance (diagnostics and tests)
    async fn pending_timers(&self, workflow_id: &str) -> Result<Vec<TimerEntry>, StoreError>;

    // =========================================================================
    // Signal mailbox
    // =========================================================================

    /// Enqueue a signal for an instance
    async fn send_signal(
        &self,
        workflow_id: &str,
        signal: WorkflowSignal,
    ) -> Result<(), StoreError>;

    /// Unprocessed signals, in receipt order
    async fn pending_signals(
        &self,
        workflow_id: &str,
    ) -> Result<Vec<WorkflowSignal>, StoreError>;

    /// Mark the first `count` pending signals as consumed
    async fn mark_signals_processed(
        &self,
        workflow_id: &str,
        count: usize,
    ) -> Result<(), StoreError>;
}

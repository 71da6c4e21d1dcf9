//! Workflow trait definition

use serde::{de::DeserializeOwned, Serialize};

use super::{WorkflowAction, WorkflowSignal};
use crate::activity::ActivityError;

/// Error recorded when a workflow instance fails
///
/// Instances are never auto-retried: a failure is terminal and the message is
/// persisted against the owning business record.
#[derive(Debug, Clone, Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct WorkflowError {
    /// Human-readable reason
    pub message: String,

    /// Error code for programmatic handling
    pub code: Option<String>,
}

impl WorkflowError {
    /// Create a new workflow error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    /// Set the error code
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }
}

impl From<&ActivityError> for WorkflowError {
    fn from(err: &ActivityError) -> Self {
        Self {
            message: err.message.clone(),
            code: err.error_type.clone(),
        }
    }
}

impl std::fmt::Display for WorkflowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for WorkflowError {}

/// A workflow is a deterministic state machine driven by events
///
/// A workflow definition describes one long-running process as a set of
/// callbacks, each returning the actions to take next:
/// - how execution begins (`on_start`)
/// - how activity results are absorbed (`on_activity_completed`,
///   `on_activity_failed`)
/// - how durable timers resume it (`on_timer_fired`)
/// - how external signals steer it (`on_signal`)
///
/// # Determinism
///
/// Given the same event sequence, a definition must mutate its state the same
/// way. The engine rebuilds state by replaying the persisted event history, so
/// all branching on external input must go through activity results, timers
/// and signals. Actions returned during replay are discarded; only the state
/// transitions matter.
///
/// Suspension is implicit: after the returned actions are persisted, the
/// instance is idle until the next activity result, timer firing, or signal.
pub trait Workflow: Send + Sync + 'static {
    /// Unique type identifier, used to look the definition up during replay
    const TYPE: &'static str;

    /// Input type for starting (or continuing) the workflow
    type Input: Serialize + DeserializeOwned + Send + Clone;

    /// Output type on successful completion
    type Output: Serialize + DeserializeOwned + Send;

    /// Create a fresh instance from input
    ///
    /// Called when starting, when replaying, and after a
    /// [`WorkflowAction::ContinueAsNew`] reset.
    fn new(input: Self::Input) -> Self;

    /// Called when the workflow starts (or replays from the beginning)
    fn on_start(&mut self) -> Vec<WorkflowAction>;

    /// Called when an activity completes successfully
    fn on_activity_completed(
        &mut self,
        activity_id: &str,
        result: serde_json::Value,
    ) -> Vec<WorkflowAction>;

    /// Called when an activity fails for good (retries exhausted or the
    /// error was classified non-retryable)
    fn on_activity_failed(
        &mut self,
        activity_id: &str,
        error: &ActivityError,
    ) -> Vec<WorkflowAction>;

    /// Called when a durable timer fires
    fn on_timer_fired(&mut self, timer_id: &str) -> Vec<WorkflowAction> {
        let _ = timer_id;
        vec![]
    }

    /// Called once per received signal, in receipt order
    fn on_signal(&mut self, signal: &WorkflowSignal) -> Vec<WorkflowAction> {
        let _ = signal;
        vec![]
    }

    /// Whether the instance has reached a terminal state
    fn is_completed(&self) -> bool;

    /// The workflow result, if completed successfully
    fn result(&self) -> Option<Self::Output>;

    /// The workflow error, if failed
    fn error(&self) -> Option<WorkflowError> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_is_the_message() {
        let error = WorkflowError::new("bot never joined");
        assert_eq!(error.to_string(), "bot never joined");
    }

    #[test]
    fn error_code_builder() {
        let error = WorkflowError::new("no such meeting").with_code("NOT_FOUND");
        assert_eq!(error.code, Some("NOT_FOUND".to_string()));
    }

    #[test]
    fn error_from_activity_error_keeps_type() {
        let source = ActivityError::non_retryable("mailbox gone").with_type("email_bounced");
        let error = WorkflowError::from(&source);
        assert_eq!(error.message, "mailbox gone");
        assert_eq!(error.code, Some("email_bounced".to_string()));
    }
}

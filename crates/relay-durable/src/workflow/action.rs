//! Workflow actions and activity options

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::WorkflowError;
use crate::reliability::RetryPolicy;

/// Commands a workflow can issue in response to events
///
/// Each action is converted into persisted events (and store effects) before
/// the instance suspends, so that a restart resumes exactly at the next
/// unresumed step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowAction {
    /// Schedule an activity for execution by the worker pool
    ScheduleActivity {
        /// Unique identifier for this activity within the workflow
        activity_id: String,

        /// Activity type, used to look up the handler
        activity_type: String,

        /// Input data for the activity (JSON)
        input: serde_json::Value,

        /// Execution options (retry policy, per-attempt timeout)
        options: ActivityOptions,
    },

    /// Start a durable timer that fires after the given duration
    StartTimer {
        /// Unique identifier for this timer within the workflow
        timer_id: String,

        /// Duration to wait before firing
        #[serde(with = "duration_serde")]
        duration: Duration,
    },

    /// Cancel a pending timer (superseded waits)
    CancelTimer {
        /// Identifier of the timer to cancel
        timer_id: String,
    },

    /// Complete the workflow successfully
    CompleteWorkflow {
        /// Result value (JSON)
        result: serde_json::Value,
    },

    /// Fail the workflow
    FailWorkflow {
        /// Error details
        error: WorkflowError,
    },

    /// Cancel the workflow (cooperative, operator- or signal-driven)
    CancelWorkflow {
        /// Reason for cancellation
        reason: String,
    },

    /// Restart the workflow's logical execution with fresh input,
    /// discarding accumulated history but keeping the instance identity
    ///
    /// Must be the last action of a batch; anything after it is ignored.
    ContinueAsNew {
        /// Input for the next execution cycle
        input: serde_json::Value,
    },

    /// No action
    None,
}

impl WorkflowAction {
    /// Schedule an activity with default options
    pub fn schedule_activity(
        activity_id: impl Into<String>,
        activity_type: impl Into<String>,
        input: serde_json::Value,
    ) -> Self {
        Self::ScheduleActivity {
            activity_id: activity_id.into(),
            activity_type: activity_type.into(),
            input,
            options: ActivityOptions::default(),
        }
    }

    /// Start a timer
    pub fn timer(timer_id: impl Into<String>, duration: Duration) -> Self {
        Self::StartTimer {
            timer_id: timer_id.into(),
            duration,
        }
    }

    /// Cancel a timer
    pub fn cancel_timer(timer_id: impl Into<String>) -> Self {
        Self::CancelTimer {
            timer_id: timer_id.into(),
        }
    }

    /// Complete the workflow
    pub fn complete(result: serde_json::Value) -> Self {
        Self::CompleteWorkflow { result }
    }

    /// Fail the workflow
    pub fn fail(error: WorkflowError) -> Self {
        Self::FailWorkflow { error }
    }

    /// Cancel the workflow
    pub fn cancel(reason: impl Into<String>) -> Self {
        Self::CancelWorkflow {
            reason: reason.into(),
        }
    }

    /// Continue as new with fresh input
    pub fn continue_as_new(input: serde_json::Value) -> Self {
        Self::ContinueAsNew { input }
    }
}

/// Options for activity execution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityOptions {
    /// Retry policy applied by the worker pool
    pub retry_policy: RetryPolicy,

    /// Maximum wall-clock time for a single attempt
    #[serde(with = "duration_serde")]
    pub start_to_close_timeout: Duration,
}

impl Default for ActivityOptions {
    fn default() -> Self {
        Self {
            retry_policy: RetryPolicy::default(),
            start_to_close_timeout: Duration::from_secs(300),
        }
    }
}

impl ActivityOptions {
    /// Use a specific retry policy
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Set the per-attempt timeout
    pub fn with_start_to_close_timeout(mut self, timeout: Duration) -> Self {
        self.start_to_close_timeout = timeout;
        self
    }
}

/// Serde support for Duration (as milliseconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn schedule_activity_helper_uses_defaults() {
        let action = WorkflowAction::schedule_activity("send-1", "send_sequence_email", json!({}));

        match action {
            WorkflowAction::ScheduleActivity {
                activity_id,
                activity_type,
                options,
                ..
            } => {
                assert_eq!(activity_id, "send-1");
                assert_eq!(activity_type, "send_sequence_email");
                assert_eq!(options, ActivityOptions::default());
            }
            _ => panic!("expected ScheduleActivity"),
        }
    }

    #[test]
    fn action_serialization_is_tagged() {
        let action = WorkflowAction::timer("step-delay", Duration::from_secs(60));

        let json = serde_json::to_string(&action).unwrap();
        assert!(json.contains("\"type\":\"start_timer\""));

        let parsed: WorkflowAction = serde_json::from_str(&json).unwrap();
        assert_eq!(action, parsed);
    }

    #[test]
    fn continue_as_new_round_trips() {
        let action = WorkflowAction::continue_as_new(json!({"enrollment_id": "enr-7"}));
        let parsed: WorkflowAction =
            serde_json::from_str(&serde_json::to_string(&action).unwrap()).unwrap();
        assert_eq!(action, parsed);
    }

    #[test]
    fn options_round_trip_duration_as_millis() {
        let options =
            ActivityOptions::default().with_start_to_close_timeout(Duration::from_millis(1500));
        let json = serde_json::to_string(&options).unwrap();
        let parsed: ActivityOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.start_to_close_timeout, Duration::from_millis(1500));
    }
}

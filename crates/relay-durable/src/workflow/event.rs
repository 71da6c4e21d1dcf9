//! Persisted workflow events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ActivityOptions, WorkflowError, WorkflowSignal};
use crate::activity::ActivityError;

/// The append-only event log of one workflow instance
///
/// Events are immutable once written; state is reconstructed by replaying
/// them in sequence order. The sequence number of the last event is the
/// instance's history cursor: a restarted process resumes at the first
/// unresumed step, and already-processed actions are never re-issued.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// Workflow started (or was continued-as-new) with the given input
    WorkflowStarted {
        /// Input provided at start
        input: serde_json::Value,
    },

    /// Workflow completed successfully
    WorkflowCompleted {
        /// Result value
        result: serde_json::Value,
    },

    /// Workflow failed
    WorkflowFailed {
        /// Error details
        error: WorkflowError,
    },

    /// Workflow was cancelled
    WorkflowCancelled {
        /// Reason for cancellation
        reason: String,
    },

    /// Activity was scheduled for execution
    ActivityScheduled {
        /// Activity identifier within the workflow
        activity_id: String,

        /// Activity type
        activity_type: String,

        /// Activity input
        input: serde_json::Value,

        /// Execution options
        options: ActivityOptions,
    },

    /// Activity completed successfully
    ActivityCompleted {
        /// Activity identifier
        activity_id: String,

        /// Result returned by the activity
        result: serde_json::Value,
    },

    /// Activity failed (terminally, or with a retry still to come)
    ActivityFailed {
        /// Activity identifier
        activity_id: String,

        /// Error details
        error: ActivityError,

        /// Whether another attempt will be made
        will_retry: bool,
    },

    /// Durable timer was scheduled
    TimerStarted {
        /// Timer identifier
        timer_id: String,

        /// Absolute wake-up instant
        fire_at: DateTime<Utc>,
    },

    /// Timer fired
    TimerFired {
        /// Timer identifier
        timer_id: String,
    },

    /// Timer was cancelled before firing
    TimerCancelled {
        /// Timer identifier
        timer_id: String,
    },

    /// External signal was consumed
    SignalReceived {
        /// The signal
        signal: WorkflowSignal,
    },
}

impl WorkflowEvent {
    /// Whether this event ends the instance
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::WorkflowCompleted { .. }
                | Self::WorkflowFailed { .. }
                | Self::WorkflowCancelled { .. }
        )
    }

    /// The activity id, for activity-related events
    pub fn activity_id(&self) -> Option<&str> {
        match self {
            Self::ActivityScheduled { activity_id, .. }
            | Self::ActivityCompleted { activity_id, .. }
            | Self::ActivityFailed { activity_id, .. } => Some(activity_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_serialization_is_tagged() {
        let event = WorkflowEvent::WorkflowStarted {
            input: json!({"meeting_id": "mtg-1"}),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"workflow_started\""));

        let parsed: WorkflowEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, parsed);
    }

    #[test]
    fn timer_started_keeps_absolute_fire_time() {
        let fire_at = Utc::now();
        let event = WorkflowEvent::TimerStarted {
            timer_id: "join-timeout".to_string(),
            fire_at,
        };

        let parsed: WorkflowEvent =
            serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();
        assert_eq!(event, parsed);
    }

    #[test]
    fn terminal_detection() {
        assert!(WorkflowEvent::WorkflowCompleted { result: json!({}) }.is_terminal());
        assert!(WorkflowEvent::WorkflowCancelled {
            reason: "user".to_string()
        }
        .is_terminal());
        assert!(!WorkflowEvent::TimerFired {
            timer_id: "t".to_string()
        }
        .is_terminal());
    }

    #[test]
    fn activity_id_extraction() {
        let event = WorkflowEvent::ActivityCompleted {
            activity_id: "create-bot".to_string(),
            result: json!({}),
        };
        assert_eq!(event.activity_id(), Some("create-bot"));
        assert_eq!(
            WorkflowEvent::WorkflowStarted { input: json!({}) }.activity_id(),
            None
        );
    }
}

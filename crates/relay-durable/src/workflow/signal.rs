//! Signals delivered into running workflow instances

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named, single-shot external event
///
/// Signals are how the outside world (webhook handlers, operator actions)
/// talks to a running workflow instance. They are enqueued in receipt order
/// and consumed exactly once by the owning instance's next processing pass.
///
/// ```
/// use relay_durable::WorkflowSignal;
///
/// let signal = WorkflowSignal::new(
///     "bot_status_changed",
///     serde_json::json!({ "status": "in_call_recording" }),
/// );
/// assert_eq!(signal.name, "bot_status_changed");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowSignal {
    /// Signal name, matched by the workflow definition
    pub name: String,

    /// Signal payload (JSON)
    pub payload: serde_json::Value,

    /// When the signal was produced
    pub sent_at: DateTime<Utc>,
}

impl WorkflowSignal {
    /// Create a new signal stamped with the current time
    pub fn new(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            payload,
            sent_at: Utc::now(),
        }
    }

    /// Read a string field out of the payload
    pub fn payload_str(&self, field: &str) -> Option<&str> {
        self.payload.get(field).and_then(|v| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_field_access() {
        let signal = WorkflowSignal::new("bot_status_changed", serde_json::json!({"status": "done"}));
        assert_eq!(signal.payload_str("status"), Some("done"));
        assert_eq!(signal.payload_str("missing"), None);
    }

    #[test]
    fn signal_round_trips_through_json() {
        let signal = WorkflowSignal::new("cancel_bot", serde_json::json!({"reason": "user"}));
        let json = serde_json::to_string(&signal).unwrap();
        let parsed: WorkflowSignal = serde_json::from_str(&json).unwrap();
        assert_eq!(signal, parsed);
    }
}

//! Sequence enrollment workflow
//!
//! Drives one `SequenceEnrollment` through its steps. One continuation
//! generation per step cycle:
//!
//! 1. `resolve_sequence_step` reloads the enrollment; a non-Active status
//!    terminates silently; a missing step closes the enrollment Completed
//! 2. disabled steps advance and continue immediately
//! 3. a positive delay (never for the very first step) becomes a durable
//!    timer followed by a recheck: still Active, and no reply since the last
//!    outbound (the message-store query is authoritative; the recheck flips
//!    the enrollment to Replied itself when one is found)
//! 4. EMAIL steps send through the provider; a hard bounce closes the
//!    enrollment Bounced after exactly one attempt; other failures retry per
//!    policy and then fail the enrollment with the reason. Non-email steps
//!    only record a timeline event
//! 5. advance moves the cursor and computes `next_scheduled_at` from the
//!    next step's delay; past the last step the enrollment is Completed,
//!    otherwise the workflow continues-as-new with just the enrollment id —
//!    a months-long sequence keeps O(1) persisted history

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use relay_durable::{
    ActivityError, ActivityOptions, RetryPolicy, Workflow, WorkflowAction, WorkflowError,
    WorkflowSignal,
};

use crate::domain::{EnrollmentStatus, SequenceStep};

/// Activity type names
pub mod activity_types {
    pub const RESOLVE_SEQUENCE_STEP: &str = "resolve_sequence_step";
    pub const SEND_SEQUENCE_EMAIL: &str = "send_sequence_email";
    pub const RECHECK_ENROLLMENT: &str = "recheck_enrollment";
    pub const RECORD_SEQUENCE_EVENT: &str = "record_sequence_event";
    pub const ADVANCE_ENROLLMENT: &str = "advance_enrollment";
    pub const CLOSE_ENROLLMENT: &str = "close_enrollment";
}

/// Error class the email activity raises on a hard bounce
pub const EMAIL_BOUNCED: &str = "email_bounced";

const STEP_DELAY_TIMER: &str = "step-delay";

/// Deterministic workflow id: one live process per enrollment
pub fn sequence_workflow_id(enrollment_id: &str) -> String {
    format!("sequence-enrollment-{enrollment_id}")
}

/// Continuation input: the enrollment row is the durable cursor, so the
/// workflow itself carries nothing else between cycles
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceEnrollmentInput {
    pub enrollment_id: String,
}

/// Output of `resolve_sequence_step`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolveStepOutput {
    pub status: EnrollmentStatus,
    pub current_step: u32,
    pub total_steps: u32,
    pub step: Option<SequenceStep>,
}

/// Output of `recheck_enrollment`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecheckOutput {
    pub proceed: bool,
    pub reason: Option<String>,
}

/// Output of `advance_enrollment`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvanceOutput {
    pub completed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SeqPhase {
    Resolving,
    Waiting,
    Rechecking,
    Executing,
    Advancing,
    Closing,
    Done,
}

/// One cycle of the enrollment state machine
pub struct SequenceEnrollmentWorkflow {
    enrollment_id: String,
    phase: SeqPhase,
    step: Option<SequenceStep>,
    failure: Option<String>,
}

impl SequenceEnrollmentWorkflow {
    fn complete(&mut self, outcome: &str) -> Vec<WorkflowAction> {
        self.phase = SeqPhase::Done;
        vec![WorkflowAction::complete(json!({ "outcome": outcome }))]
    }

    fn close_enrollment(
        &mut self,
        activity_id: &str,
        status: EnrollmentStatus,
        reason: Option<String>,
    ) -> Vec<WorkflowAction> {
        self.phase = SeqPhase::Closing;
        vec![WorkflowAction::schedule_activity(
            activity_id,
            activity_types::CLOSE_ENROLLMENT,
            json!({
                "enrollment_id": self.enrollment_id,
                "status": status,
                "reason": reason,
            }),
        )]
    }

    fn execute_step(&mut self) -> Vec<WorkflowAction> {
        let step = match &self.step {
            Some(step) => step.clone(),
            None => return self.complete("no_step"),
        };

        self.phase = SeqPhase::Executing;
        if step.step_type.sends_email() {
            vec![WorkflowAction::ScheduleActivity {
                activity_id: "send-email".to_string(),
                activity_type: activity_types::SEND_SEQUENCE_EMAIL.to_string(),
                input: json!({
                    "enrollment_id": self.enrollment_id,
                    "step_number": step.number,
                    "subject": step.subject,
                    "body": step.body,
                }),
                options: ActivityOptions::default()
                    .with_retry(RetryPolicy::exponential().with_max_attempts(3))
                    .with_start_to_close_timeout(Duration::from_secs(60)),
            }]
        } else {
            // WAIT / TASK / LINKEDIN_* steps only leave a timeline event for
            // manual follow-through
            vec![WorkflowAction::schedule_activity(
                "record-step",
                activity_types::RECORD_SEQUENCE_EVENT,
                json!({
                    "enrollment_id": self.enrollment_id,
                    "step_number": step.number,
                    "step_type": step.step_type,
                }),
            )]
        }
    }

    fn advance(&mut self) -> Vec<WorkflowAction> {
        self.phase = SeqPhase::Advancing;
        vec![WorkflowAction::schedule_activity(
            "advance",
            activity_types::ADVANCE_ENROLLMENT,
            json!({ "enrollment_id": self.enrollment_id }),
        )]
    }

    fn fail_with(&mut self, activity_id: &str, message: &str) -> Vec<WorkflowAction> {
        self.failure = Some(message.to_string());
        self.close_enrollment(
            "close-failed",
            EnrollmentStatus::Failed,
            Some(format!("{activity_id}: {message}")),
        )
    }
}

impl Workflow for SequenceEnrollmentWorkflow {
    const TYPE: &'static str = "sequence_enrollment";
    type Input = SequenceEnrollmentInput;
    type Output = serde_json::Value;

    fn new(input: Self::Input) -> Self {
        Self {
            enrollment_id: input.enrollment_id,
            phase: SeqPhase::Resolving,
            step: None,
            failure: None,
        }
    }

    fn on_start(&mut self) -> Vec<WorkflowAction> {
        self.phase = SeqPhase::Resolving;
        vec![WorkflowAction::schedule_activity(
            "resolve",
            activity_types::RESOLVE_SEQUENCE_STEP,
            json!({ "enrollment_id": self.enrollment_id }),
        )]
    }

    fn on_activity_completed(
        &mut self,
        activity_id: &str,
        result: serde_json::Value,
    ) -> Vec<WorkflowAction> {
        match activity_id {
            "resolve" => {
                let resolved: ResolveStepOutput = match serde_json::from_value(result) {
                    Ok(r) => r,
                    Err(e) => return self.fail_with("resolve", &format!("bad resolve output: {e}")),
                };

                // Paused, replied, unsubscribed, cancelled: nothing to do
                if !resolved.status.is_active() {
                    debug!(
                        enrollment_id = %self.enrollment_id,
                        status = ?resolved.status,
                        "enrollment no longer active"
                    );
                    return self.complete("inactive");
                }

                let step = match resolved.step {
                    // Ran past the configured steps: close out as completed
                    None => {
                        return self.close_enrollment(
                            "close-completed",
                            EnrollmentStatus::Completed,
                            None,
                        )
                    }
                    Some(step) => step,
                };

                if !step.enabled {
                    // Skip without delay; the advance continues the cycle
                    self.step = Some(step);
                    return self.advance();
                }

                let delay_ms = step.delay_ms();
                let is_first = resolved.current_step <= 1;
                self.step = Some(step);

                if delay_ms > 0 && !is_first {
                    self.phase = SeqPhase::Waiting;
                    vec![WorkflowAction::timer(
                        STEP_DELAY_TIMER,
                        Duration::from_millis(delay_ms),
                    )]
                } else {
                    self.execute_step()
                }
            }

            "recheck" => {
                let recheck: RecheckOutput = match serde_json::from_value(result) {
                    Ok(r) => r,
                    Err(e) => return self.fail_with("recheck", &format!("bad recheck output: {e}")),
                };
                if recheck.proceed {
                    self.execute_step()
                } else {
                    // Replied or deactivated during the wait; the recheck
                    // activity already updated the enrollment
                    self.complete(recheck.reason.as_deref().unwrap_or("stopped"))
                }
            }

            "send-email" | "record-step" => self.advance(),

            "advance" => {
                let advance: AdvanceOutput = match serde_json::from_value(result) {
                    Ok(r) => r,
                    Err(e) => return self.fail_with("advance", &format!("bad advance output: {e}")),
                };
                if advance.completed {
                    self.complete("completed")
                } else {
                    // Fresh cycle, fresh history: only the enrollment id
                    // crosses the boundary
                    vec![WorkflowAction::continue_as_new(
                        json!({ "enrollment_id": self.enrollment_id }),
                    )]
                }
            }

            "close-completed" => self.complete("completed"),

            "close-bounced" => self.complete("bounced"),

            "close-failed" => {
                let message = self
                    .failure
                    .clone()
                    .unwrap_or_else(|| "sequence step failed".to_string());
                self.phase = SeqPhase::Done;
                vec![WorkflowAction::fail(WorkflowError::new(message))]
            }

            _ => vec![],
        }
    }

    fn on_activity_failed(
        &mut self,
        activity_id: &str,
        error: &ActivityError,
    ) -> Vec<WorkflowAction> {
        if activity_id == "send-email" && error.is_type(EMAIL_BOUNCED) {
            // Business-terminal, not an error: close as Bounced without
            // retrying the send
            return self.close_enrollment(
                "close-bounced",
                EnrollmentStatus::Bounced,
                Some(error.message.clone()),
            );
        }

        if activity_id == "close-failed" || activity_id == "close-bounced" || activity_id == "close-completed" {
            // Closing the enrollment itself failed; surface the original
            // reason rather than looping
            let message = self
                .failure
                .clone()
                .unwrap_or_else(|| error.message.clone());
            self.phase = SeqPhase::Done;
            return vec![WorkflowAction::fail(WorkflowError::new(message))];
        }

        self.fail_with(activity_id, &error.message)
    }

    fn on_timer_fired(&mut self, timer_id: &str) -> Vec<WorkflowAction> {
        if timer_id == STEP_DELAY_TIMER && self.phase == SeqPhase::Waiting {
            self.phase = SeqPhase::Rechecking;
            return vec![WorkflowAction::schedule_activity(
                "recheck",
                activity_types::RECHECK_ENROLLMENT,
                json!({ "enrollment_id": self.enrollment_id }),
            )];
        }
        vec![]
    }

    fn on_signal(&mut self, signal: &WorkflowSignal) -> Vec<WorkflowAction> {
        // Pause/cancel are user actions on the enrollment row itself; the
        // next resolve or recheck observes them. No signals steer this
        // process directly.
        debug!(
            enrollment_id = %self.enrollment_id,
            signal = %signal.name,
            "sequence enrollment ignores signals"
        );
        vec![]
    }

    fn is_completed(&self) -> bool {
        self.phase == SeqPhase::Done
    }

    fn result(&self) -> Option<Self::Output> {
        (self.phase == SeqPhase::Done && self.failure.is_none())
            .then(|| json!({ "enrollment_id": self.enrollment_id }))
    }

    fn error(&self) -> Option<WorkflowError> {
        self.failure.as_deref().map(WorkflowError::new)
    }
}

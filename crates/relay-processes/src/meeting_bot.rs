//! Meeting recording bot lifecycle workflow
//!
//! Phases: `Scheduled → Joining → Recording → Processing → Ready`, with
//! `Cancelled` and `Failed` reachable from any non-terminal phase.
//!
//! The workflow waits until two minutes before the meeting (re-arming a
//! bounded one-minute timer so a late cancellation is observed within a
//! minute), creates the external bot, then follows the provider's status
//! webhooks — `bot_status_changed` signals — through recording and into
//! post-processing: download the asset, process the transcript, hand off to
//! insights generation, mark the meeting Ready.
//!
//! Cancellation is receipt-ordered: a `cancel_bot` signal only wins if it is
//! observed before a terminal bot status. Once the bot has reported done, a
//! late cancellation is ignored and the meeting still becomes Ready.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use relay_durable::{
    ActivityError, ActivityOptions, RetryPolicy, Workflow, WorkflowAction, WorkflowError,
    WorkflowSignal,
};

use crate::domain::MeetingStatus;

/// Signals consumed by this workflow
pub mod signals {
    /// Webhook-relayed bot status update, payload `{ "status": "<status>" }`
    pub const BOT_STATUS_CHANGED: &str = "bot_status_changed";

    /// Operator/user cancellation
    pub const CANCEL_BOT: &str = "cancel_bot";
}

/// Bot status values reported by the recording provider
pub mod bot_status {
    pub const IN_CALL_RECORDING: &str = "in_call_recording";
    pub const CALL_ENDED: &str = "call_ended";
    pub const DONE: &str = "done";
    pub const ANALYSIS_DONE: &str = "analysis_done";
    pub const FATAL: &str = "fatal";
}

/// Activity type names
pub mod activity_types {
    pub const CREATE_RECORDING_BOT: &str = "create_recording_bot";
    pub const UPDATE_MEETING: &str = "update_meeting";
    pub const DOWNLOAD_RECORDING: &str = "download_recording";
    pub const PROCESS_TRANSCRIPT: &str = "process_transcript";
    pub const TRIGGER_INSIGHTS: &str = "trigger_insights";
}

const JOIN_POLL_TIMER: &str = "join-poll";
const JOIN_TIMEOUT_TIMER: &str = "join-timeout";
const RECORDING_TIMEOUT_TIMER: &str = "recording-timeout";

/// Join this many seconds before the scheduled start
const JOIN_LEAD_SECS: i64 = 120;

/// Cancellation re-check granularity while waiting for join time
const JOIN_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// The bot must report a status within this long of creation
const JOIN_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Upper bound on a single recording
const RECORDING_TIMEOUT: Duration = Duration::from_secs(4 * 3600);

/// Deterministic workflow id: at most one bot lifecycle per meeting
pub fn meeting_bot_workflow_id(meeting_id: &str) -> String {
    format!("meeting-bot-{meeting_id}")
}

/// Input for one bot lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeetingBotInput {
    pub meeting_id: String,
    pub tenant_id: String,
    pub user_id: String,
    pub meeting_url: String,
    pub scheduled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BotPhase {
    Scheduled,
    Joining,
    Recording,
    Processing,
    Ready,
    Cancelled,
    Failed,
}

/// The meeting bot lifecycle state machine
pub struct MeetingBotWorkflow {
    input: MeetingBotInput,
    phase: BotPhase,
    bot_id: Option<String>,
    failure: Option<String>,
}

impl MeetingBotWorkflow {
    fn join_at(&self) -> DateTime<Utc> {
        self.input.scheduled_at - chrono::Duration::seconds(JOIN_LEAD_SECS)
    }

    /// Wait for join time with bounded granularity, or begin joining now.
    /// The clock only sizes the next wait; a replay with a later clock
    /// converges to the same phase.
    fn arm_or_join(&mut self) -> Vec<WorkflowAction> {
        let remaining = self.join_at() - Utc::now();
        if remaining <= chrono::Duration::zero() {
            return self.begin_joining();
        }

        let wait = remaining
            .to_std()
            .unwrap_or(JOIN_POLL_INTERVAL)
            .min(JOIN_POLL_INTERVAL);
        vec![WorkflowAction::timer(JOIN_POLL_TIMER, wait)]
    }

    fn begin_joining(&mut self) -> Vec<WorkflowAction> {
        self.phase = BotPhase::Joining;
        vec![
            self.update_meeting("update-joining", MeetingStatus::BotJoining, None),
            WorkflowAction::schedule_activity(
                "create-bot",
                activity_types::CREATE_RECORDING_BOT,
                json!({
                    "meeting_id": self.input.meeting_id,
                    "meeting_url": self.input.meeting_url,
                }),
            ),
            WorkflowAction::timer(JOIN_TIMEOUT_TIMER, JOIN_TIMEOUT),
        ]
    }

    fn begin_recording(&mut self) -> Vec<WorkflowAction> {
        self.phase = BotPhase::Recording;
        vec![
            WorkflowAction::cancel_timer(JOIN_TIMEOUT_TIMER),
            WorkflowAction::timer(RECORDING_TIMEOUT_TIMER, RECORDING_TIMEOUT),
            self.update_meeting("update-recording", MeetingStatus::Recording, None),
        ]
    }

    fn begin_processing(&mut self) -> Vec<WorkflowAction> {
        self.phase = BotPhase::Processing;
        vec![
            WorkflowAction::cancel_timer(JOIN_TIMEOUT_TIMER),
            WorkflowAction::cancel_timer(RECORDING_TIMEOUT_TIMER),
            self.update_meeting("update-processing", MeetingStatus::Processing, None),
            WorkflowAction::schedule_activity(
                "download",
                activity_types::DOWNLOAD_RECORDING,
                json!({
                    "meeting_id": self.input.meeting_id,
                    "bot_id": self.bot_id,
                }),
            ),
        ]
    }

    fn cancel(&mut self) -> Vec<WorkflowAction> {
        self.phase = BotPhase::Cancelled;
        vec![
            self.update_meeting("update-cancelled", MeetingStatus::Cancelled, None),
            WorkflowAction::cancel("recording cancelled by user"),
        ]
    }

    fn fail(&mut self, message: impl Into<String>) -> Vec<WorkflowAction> {
        let message = message.into();
        self.phase = BotPhase::Failed;
        self.failure = Some(message.clone());
        vec![
            self.update_meeting("update-failed", MeetingStatus::Failed, Some(&message)),
            WorkflowAction::fail(WorkflowError::new(message)),
        ]
    }

    fn update_meeting(
        &self,
        activity_id: &str,
        status: MeetingStatus,
        error_message: Option<&str>,
    ) -> WorkflowAction {
        WorkflowAction::ScheduleActivity {
            activity_id: activity_id.to_string(),
            activity_type: activity_types::UPDATE_MEETING.to_string(),
            input: json!({
                "meeting_id": self.input.meeting_id,
                "status": status,
                "error_message": error_message,
            }),
            options: ActivityOptions::default()
                .with_retry(RetryPolicy::exponential().with_max_attempts(3)),
        }
    }

    fn is_terminal_status(status: &str) -> bool {
        matches!(
            status,
            bot_status::DONE | bot_status::CALL_ENDED | bot_status::ANALYSIS_DONE
        )
    }
}

impl Workflow for MeetingBotWorkflow {
    const TYPE: &'static str = "meeting_bot";
    type Input = MeetingBotInput;
    type Output = serde_json::Value;

    fn new(input: Self::Input) -> Self {
        Self {
            input,
            phase: BotPhase::Scheduled,
            bot_id: None,
            failure: None,
        }
    }

    fn on_start(&mut self) -> Vec<WorkflowAction> {
        self.arm_or_join()
    }

    fn on_timer_fired(&mut self, timer_id: &str) -> Vec<WorkflowAction> {
        match timer_id {
            JOIN_POLL_TIMER if self.phase == BotPhase::Scheduled => self.arm_or_join(),
            JOIN_TIMEOUT_TIMER if self.phase == BotPhase::Joining => {
                self.fail("recording bot did not report a status within 5 minutes")
            }
            RECORDING_TIMEOUT_TIMER if self.phase == BotPhase::Recording => {
                self.fail("recording did not complete within 4 hours")
            }
            _ => vec![],
        }
    }

    fn on_signal(&mut self, signal: &WorkflowSignal) -> Vec<WorkflowAction> {
        match signal.name.as_str() {
            signals::CANCEL_BOT => match self.phase {
                // Cancellation only wins while the lifecycle is still in
                // flight; observed after a terminal bot status it is ignored
                BotPhase::Scheduled | BotPhase::Joining | BotPhase::Recording => self.cancel(),
                _ => {
                    debug!(
                        meeting_id = %self.input.meeting_id,
                        "ignoring cancellation after terminal bot status"
                    );
                    vec![]
                }
            },

            signals::BOT_STATUS_CHANGED => {
                let status = signal.payload_str("status").unwrap_or_default().to_string();
                match self.phase {
                    BotPhase::Joining => {
                        if status == bot_status::FATAL {
                            self.fail("recording bot reported a fatal error")
                        } else if status == bot_status::IN_CALL_RECORDING {
                            self.begin_recording()
                        } else if Self::is_terminal_status(&status) {
                            // Short meeting: the call ended before we ever saw
                            // an in-call status
                            self.begin_processing()
                        } else {
                            vec![]
                        }
                    }
                    BotPhase::Recording => {
                        if status == bot_status::FATAL {
                            self.fail("recording bot reported a fatal error")
                        } else if Self::is_terminal_status(&status) {
                            self.begin_processing()
                        } else {
                            vec![]
                        }
                    }
                    _ => {
                        debug!(
                            meeting_id = %self.input.meeting_id,
                            %status,
                            "ignoring bot status outside join/recording phases"
                        );
                        vec![]
                    }
                }
            }

            _ => vec![],
        }
    }

    fn on_activity_completed(
        &mut self,
        activity_id: &str,
        result: serde_json::Value,
    ) -> Vec<WorkflowAction> {
        match activity_id {
            "create-bot" => {
                self.bot_id = result
                    .get("bot_id")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                // Suspended on bot status signals now
                vec![]
            }

            "download" if self.phase == BotPhase::Processing => {
                let transcript_text = result.get("transcript_text").cloned();
                vec![WorkflowAction::schedule_activity(
                    "process-transcript",
                    activity_types::PROCESS_TRANSCRIPT,
                    json!({
                        "meeting_id": self.input.meeting_id,
                        "transcript_text": transcript_text,
                    }),
                )]
            }

            "process-transcript" if self.phase == BotPhase::Processing => {
                vec![WorkflowAction::schedule_activity(
                    "trigger-insights",
                    activity_types::TRIGGER_INSIGHTS,
                    json!({
                        "meeting_id": self.input.meeting_id,
                        "tenant_id": self.input.tenant_id,
                        "user_id": self.input.user_id,
                    }),
                )]
            }

            "trigger-insights" if self.phase == BotPhase::Processing => {
                self.phase = BotPhase::Ready;
                vec![
                    self.update_meeting("update-ready", MeetingStatus::Ready, None),
                    WorkflowAction::complete(json!({
                        "meeting_id": self.input.meeting_id,
                        "bot_id": self.bot_id,
                    })),
                ]
            }

            // Record-keeping updates don't advance the machine
            _ => vec![],
        }
    }

    fn on_activity_failed(
        &mut self,
        activity_id: &str,
        error: &ActivityError,
    ) -> Vec<WorkflowAction> {
        match self.phase {
            // A bookkeeping write failed after the outcome was already
            // decided; the instance keeps its terminal status
            BotPhase::Ready | BotPhase::Cancelled | BotPhase::Failed => {
                debug!(
                    meeting_id = %self.input.meeting_id,
                    %activity_id,
                    "ignoring activity failure in terminal phase"
                );
                vec![]
            }
            _ => self.fail(format!("{activity_id}: {}", error.message)),
        }
    }

    fn is_completed(&self) -> bool {
        matches!(
            self.phase,
            BotPhase::Ready | BotPhase::Cancelled | BotPhase::Failed
        )
    }

    fn result(&self) -> Option<Self::Output> {
        (self.phase == BotPhase::Ready).then(|| {
            json!({
                "meeting_id": self.input.meeting_id,
                "bot_id": self.bot_id,
            })
        })
    }

    fn error(&self) -> Option<WorkflowError> {
        self.failure.as_deref().map(WorkflowError::new)
    }
}

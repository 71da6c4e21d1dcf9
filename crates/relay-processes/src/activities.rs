//! Activity implementations for the CRM processes
//!
//! Each activity owns the collaborator clients it needs and is registered on
//! the worker pool by type name via [`register_activities`].

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use relay_durable::{Activity, ActivityContext, ActivityError, WorkerPool, WorkflowStore};

use crate::collaborators::{
    CrmStore, EmailClient, EmailSendError, InsightsClient, OutboundEmail, RecordingBotClient,
    SendReceipt,
};
use crate::domain::{
    EnrollmentEventKind, EnrollmentStatus, EnrollmentUpdate, MeetingStatus, StepType,
};
use crate::meeting_bot::activity_types as bot_activities;
use crate::sequence::{
    activity_types as seq_activities, AdvanceOutput, RecheckOutput, ResolveStepOutput,
    EMAIL_BOUNCED,
};

/// Collaborator clients handed to the activities
///
/// Constructed once by the embedding application and cloned into each
/// activity; nothing here is global.
#[derive(Clone)]
pub struct ProcessDeps {
    pub crm: Arc<dyn CrmStore>,
    pub recorder: Arc<dyn RecordingBotClient>,
    pub email: Arc<dyn EmailClient>,
    pub insights: Arc<dyn InsightsClient>,
    /// Webhook endpoint the recording provider posts bot status to
    pub bot_webhook_url: String,
}

/// Register every process activity on the worker pool
pub fn register_activities<S: WorkflowStore>(pool: &WorkerPool<S>, deps: &ProcessDeps) {
    pool.register_activity(CreateRecordingBotActivity {
        crm: deps.crm.clone(),
        recorder: deps.recorder.clone(),
        webhook_url: deps.bot_webhook_url.clone(),
    });
    pool.register_activity(UpdateMeetingActivity {
        crm: deps.crm.clone(),
    });
    pool.register_activity(DownloadRecordingActivity {
        crm: deps.crm.clone(),
        recorder: deps.recorder.clone(),
    });
    pool.register_activity(ProcessTranscriptActivity {
        crm: deps.crm.clone(),
    });
    pool.register_activity(TriggerInsightsActivity {
        insights: deps.insights.clone(),
    });

    pool.register_activity(ResolveSequenceStepActivity {
        crm: deps.crm.clone(),
    });
    pool.register_activity(SendSequenceEmailActivity {
        crm: deps.crm.clone(),
        email: deps.email.clone(),
    });
    pool.register_activity(RecheckEnrollmentActivity {
        crm: deps.crm.clone(),
    });
    pool.register_activity(RecordSequenceEventActivity {
        crm: deps.crm.clone(),
    });
    pool.register_activity(AdvanceEnrollmentActivity {
        crm: deps.crm.clone(),
    });
    pool.register_activity(CloseEnrollmentActivity {
        crm: deps.crm.clone(),
    });
}

// =============================================================================
// Meeting bot activities
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateBotInput {
    pub meeting_id: String,
    pub meeting_url: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateBotOutput {
    pub bot_id: String,
}

/// Create the external recording bot and remember its id on the meeting
pub struct CreateRecordingBotActivity {
    pub crm: Arc<dyn CrmStore>,
    pub recorder: Arc<dyn RecordingBotClient>,
    pub webhook_url: String,
}

#[async_trait]
impl Activity for CreateRecordingBotActivity {
    const TYPE: &'static str = bot_activities::CREATE_RECORDING_BOT;
    type Input = CreateBotInput;
    type Output = CreateBotOutput;

    async fn execute(
        &self,
        _ctx: &ActivityContext,
        input: Self::Input,
    ) -> Result<Self::Output, ActivityError> {
        let bot_id = self
            .recorder
            .create_bot(&input.meeting_url, &self.webhook_url)
            .await?;

        self.crm.set_meeting_bot(&input.meeting_id, &bot_id).await?;

        info!(meeting_id = %input.meeting_id, %bot_id, "created recording bot");
        Ok(CreateBotOutput { bot_id })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateMeetingInput {
    pub meeting_id: String,
    pub status: MeetingStatus,
    pub error_message: Option<String>,
}

/// Write a lifecycle status (and optional failure reason) to the meeting row
pub struct UpdateMeetingActivity {
    pub crm: Arc<dyn CrmStore>,
}

#[async_trait]
impl Activity for UpdateMeetingActivity {
    const TYPE: &'static str = bot_activities::UPDATE_MEETING;
    type Input = UpdateMeetingInput;
    type Output = serde_json::Value;

    async fn execute(
        &self,
        _ctx: &ActivityContext,
        input: Self::Input,
    ) -> Result<Self::Output, ActivityError> {
        self.crm
            .update_meeting_status(&input.meeting_id, input.status, input.error_message)
            .await?;
        Ok(json!({}))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DownloadRecordingInput {
    pub meeting_id: String,
    /// Absent if the status webhook outran bot creation; resolved from the
    /// meeting row in that case
    pub bot_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DownloadRecordingOutput {
    pub transcript_text: Option<String>,
}

/// Fetch the finished recording and persist its location
pub struct DownloadRecordingActivity {
    pub crm: Arc<dyn CrmStore>,
    pub recorder: Arc<dyn RecordingBotClient>,
}

#[async_trait]
impl Activity for DownloadRecordingActivity {
    const TYPE: &'static str = bot_activities::DOWNLOAD_RECORDING;
    type Input = DownloadRecordingInput;
    type Output = DownloadRecordingOutput;

    async fn execute(
        &self,
        _ctx: &ActivityContext,
        input: Self::Input,
    ) -> Result<Self::Output, ActivityError> {
        let bot_id = match input.bot_id {
            Some(bot_id) => bot_id,
            None => self
                .crm
                .meeting(&input.meeting_id)
                .await?
                .bot_id
                .ok_or_else(|| {
                    ActivityError::non_retryable("meeting has no recording bot to download from")
                })?,
        };

        let asset = self.recorder.fetch_recording(&bot_id).await?;
        self.crm
            .set_meeting_recording(&input.meeting_id, &asset.media_url)
            .await?;

        Ok(DownloadRecordingOutput {
            transcript_text: asset.transcript_text,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProcessTranscriptInput {
    pub meeting_id: String,
    pub transcript_text: Option<String>,
}

/// Persist the transcript against the meeting
pub struct ProcessTranscriptActivity {
    pub crm: Arc<dyn CrmStore>,
}

#[async_trait]
impl Activity for ProcessTranscriptActivity {
    const TYPE: &'static str = bot_activities::PROCESS_TRANSCRIPT;
    type Input = ProcessTranscriptInput;
    type Output = serde_json::Value;

    async fn execute(
        &self,
        _ctx: &ActivityContext,
        input: Self::Input,
    ) -> Result<Self::Output, ActivityError> {
        if let Some(transcript) = &input.transcript_text {
            self.crm
                .save_meeting_transcript(&input.meeting_id, transcript)
                .await?;
        }
        Ok(json!({}))
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TriggerInsightsInput {
    pub meeting_id: String,
    pub tenant_id: String,
    pub user_id: String,
}

/// Fire-and-forget handoff to insights generation
pub struct TriggerInsightsActivity {
    pub insights: Arc<dyn InsightsClient>,
}

#[async_trait]
impl Activity for TriggerInsightsActivity {
    const TYPE: &'static str = bot_activities::TRIGGER_INSIGHTS;
    type Input = TriggerInsightsInput;
    type Output = serde_json::Value;

    async fn execute(
        &self,
        _ctx: &ActivityContext,
        input: Self::Input,
    ) -> Result<Self::Output, ActivityError> {
        self.insights
            .trigger(&input.meeting_id, &input.tenant_id, &input.user_id)
            .await?;
        Ok(json!({}))
    }
}

// =============================================================================
// Sequence enrollment activities
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct EnrollmentRef {
    pub enrollment_id: String,
}

/// Reload the enrollment and the step at its cursor
pub struct ResolveSequenceStepActivity {
    pub crm: Arc<dyn CrmStore>,
}

#[async_trait]
impl Activity for ResolveSequenceStepActivity {
    const TYPE: &'static str = seq_activities::RESOLVE_SEQUENCE_STEP;
    type Input = EnrollmentRef;
    type Output = ResolveStepOutput;

    async fn execute(
        &self,
        _ctx: &ActivityContext,
        input: Self::Input,
    ) -> Result<Self::Output, ActivityError> {
        let enrollment = self.crm.enrollment(&input.enrollment_id).await?;

        let step = if enrollment.status.is_active() && enrollment.current_step <= enrollment.total_steps
        {
            self.crm
                .sequence_step(&enrollment.sequence_id, enrollment.current_step)
                .await?
        } else {
            None
        };

        Ok(ResolveStepOutput {
            status: enrollment.status,
            current_step: enrollment.current_step,
            total_steps: enrollment.total_steps,
            step,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SendSequenceEmailInput {
    pub enrollment_id: String,
    pub step_number: u32,
    pub subject: Option<String>,
    pub body: String,
}

/// Send one EMAIL step through the provider and record the send
pub struct SendSequenceEmailActivity {
    pub crm: Arc<dyn CrmStore>,
    pub email: Arc<dyn EmailClient>,
}

#[async_trait]
impl Activity for SendSequenceEmailActivity {
    const TYPE: &'static str = seq_activities::SEND_SEQUENCE_EMAIL;
    type Input = SendSequenceEmailInput;
    type Output = SendReceipt;

    async fn execute(
        &self,
        _ctx: &ActivityContext,
        input: Self::Input,
    ) -> Result<Self::Output, ActivityError> {
        let enrollment = self.crm.enrollment(&input.enrollment_id).await?;
        let to = self.crm.contact_email(&enrollment.contact_id).await?;
        let token = self.crm.email_access_token(&enrollment.user_id).await?;

        let message = OutboundEmail {
            to,
            subject: input.subject.unwrap_or_default(),
            body: input.body,
        };

        let receipt = match self.email.send(&token, &message).await {
            Ok(receipt) => receipt,
            // A hard bounce must not be retried: classify it so the retry
            // policy and the workflow both see it
            Err(EmailSendError::Bounced(reason)) => {
                return Err(ActivityError::non_retryable(reason).with_type(EMAIL_BOUNCED))
            }
            Err(EmailSendError::Other(e)) => return Err(ActivityError::from(e)),
        };

        let now = Utc::now();
        self.crm
            .update_enrollment(
                &input.enrollment_id,
                EnrollmentUpdate {
                    last_outbound_at: Some(now),
                    ..Default::default()
                },
            )
            .await?;
        self.crm
            .record_enrollment_event(
                &input.enrollment_id,
                EnrollmentEventKind::EmailSent,
                json!({
                    "step_number": input.step_number,
                    "external_id": receipt.external_id,
                }),
            )
            .await?;

        info!(
            enrollment_id = %input.enrollment_id,
            step_number = input.step_number,
            "sent sequence email"
        );
        Ok(receipt)
    }
}

/// Re-check an enrollment after a durable wait: still active, and no reply
pub struct RecheckEnrollmentActivity {
    pub crm: Arc<dyn CrmStore>,
}

#[async_trait]
impl Activity for RecheckEnrollmentActivity {
    const TYPE: &'static str = seq_activities::RECHECK_ENROLLMENT;
    type Input = EnrollmentRef;
    type Output = RecheckOutput;

    async fn execute(
        &self,
        _ctx: &ActivityContext,
        input: Self::Input,
    ) -> Result<Self::Output, ActivityError> {
        let enrollment = self.crm.enrollment(&input.enrollment_id).await?;

        if !enrollment.status.is_active() {
            return Ok(RecheckOutput {
                proceed: false,
                reason: Some("inactive".to_string()),
            });
        }

        // The message query is the source of truth for replies; cached
        // timestamps on the enrollment are not consulted
        if let Some(last_outbound_at) = enrollment.last_outbound_at {
            let replied = self
                .crm
                .has_inbound_message_after(&enrollment.contact_id, last_outbound_at)
                .await?;

            if replied {
                self.crm
                    .update_enrollment(
                        &input.enrollment_id,
                        EnrollmentUpdate::status(EnrollmentStatus::Replied),
                    )
                    .await?;
                self.crm
                    .record_enrollment_event(
                        &input.enrollment_id,
                        EnrollmentEventKind::ReplyDetected,
                        json!({}),
                    )
                    .await?;

                info!(enrollment_id = %input.enrollment_id, "reply detected, stopping sequence");
                return Ok(RecheckOutput {
                    proceed: false,
                    reason: Some("replied".to_string()),
                });
            }
        }

        Ok(RecheckOutput {
            proceed: true,
            reason: None,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RecordSequenceEventInput {
    pub enrollment_id: String,
    pub step_number: u32,
    pub step_type: StepType,
}

/// Leave a timeline event for steps that need manual follow-through
pub struct RecordSequenceEventActivity {
    pub crm: Arc<dyn CrmStore>,
}

#[async_trait]
impl Activity for RecordSequenceEventActivity {
    const TYPE: &'static str = seq_activities::RECORD_SEQUENCE_EVENT;
    type Input = RecordSequenceEventInput;
    type Output = serde_json::Value;

    async fn execute(
        &self,
        _ctx: &ActivityContext,
        input: Self::Input,
    ) -> Result<Self::Output, ActivityError> {
        self.crm
            .record_enrollment_event(
                &input.enrollment_id,
                EnrollmentEventKind::ManualStepQueued,
                json!({
                    "step_number": input.step_number,
                    "step_type": input.step_type,
                }),
            )
            .await?;
        Ok(json!({}))
    }
}

/// Move the cursor to the next step and schedule it
pub struct AdvanceEnrollmentActivity {
    pub crm: Arc<dyn CrmStore>,
}

#[async_trait]
impl Activity for AdvanceEnrollmentActivity {
    const TYPE: &'static str = seq_activities::ADVANCE_ENROLLMENT;
    type Input = EnrollmentRef;
    type Output = AdvanceOutput;

    async fn execute(
        &self,
        _ctx: &ActivityContext,
        input: Self::Input,
    ) -> Result<Self::Output, ActivityError> {
        let enrollment = self.crm.enrollment(&input.enrollment_id).await?;
        let next = enrollment.current_step + 1;

        if next > enrollment.total_steps {
            self.crm
                .update_enrollment(
                    &input.enrollment_id,
                    EnrollmentUpdate {
                        status: Some(EnrollmentStatus::Completed),
                        next_scheduled_at: Some(None),
                        ..Default::default()
                    },
                )
                .await?;
            info!(enrollment_id = %input.enrollment_id, "enrollment completed");
            return Ok(AdvanceOutput { completed: true });
        }

        // The next step's configured delay determines when it is due
        let next_step = self
            .crm
            .sequence_step(&enrollment.sequence_id, next)
            .await?;
        let delay_ms = next_step.map(|s| s.delay_ms()).unwrap_or(0);
        let next_at = Utc::now() + chrono::Duration::milliseconds(delay_ms as i64);

        self.crm
            .update_enrollment(
                &input.enrollment_id,
                EnrollmentUpdate {
                    current_step: Some(next),
                    next_scheduled_at: Some(Some(next_at)),
                    ..Default::default()
                },
            )
            .await?;

        Ok(AdvanceOutput { completed: false })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CloseEnrollmentInput {
    pub enrollment_id: String,
    pub status: EnrollmentStatus,
    pub reason: Option<String>,
}

/// Put the enrollment into a terminal status, with the reason when failing
pub struct CloseEnrollmentActivity {
    pub crm: Arc<dyn CrmStore>,
}

#[async_trait]
impl Activity for CloseEnrollmentActivity {
    const TYPE: &'static str = seq_activities::CLOSE_ENROLLMENT;
    type Input = CloseEnrollmentInput;
    type Output = serde_json::Value;

    async fn execute(
        &self,
        _ctx: &ActivityContext,
        input: Self::Input,
    ) -> Result<Self::Output, ActivityError> {
        let mut update = EnrollmentUpdate::status(input.status);
        update.next_scheduled_at = Some(None);
        if let Some(reason) = &input.reason {
            update = update.with_error(reason.clone());
        }

        self.crm.update_enrollment(&input.enrollment_id, update).await?;

        if input.status == EnrollmentStatus::Bounced {
            self.crm
                .record_enrollment_event(
                    &input.enrollment_id,
                    EnrollmentEventKind::EmailBounced,
                    json!({ "reason": input.reason }),
                )
                .await?;
        }

        Ok(json!({}))
    }
}

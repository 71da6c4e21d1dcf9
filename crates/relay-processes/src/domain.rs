//! CRM entities the processes read and write
//!
//! The relational schema is owned by the enclosing CRM; these are serde
//! mirrors carrying exactly the fields the processes touch.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a recorded meeting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeetingStatus {
    Scheduled,
    BotJoining,
    Recording,
    Processing,
    Ready,
    Cancelled,
    Failed,
}

impl std::fmt::Display for MeetingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Scheduled => "scheduled",
            Self::BotJoining => "bot_joining",
            Self::Recording => "recording",
            Self::Processing => "processing",
            Self::Ready => "ready",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// A calendar meeting with a recording-bot lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meeting {
    pub id: String,
    pub tenant_id: String,
    pub user_id: String,
    pub title: String,
    pub meeting_url: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub status: MeetingStatus,
    pub bot_id: Option<String>,
    pub recording_url: Option<String>,
    pub error_message: Option<String>,
}

/// Status of one contact's enrollment in an outreach sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    Active,
    Paused,
    Completed,
    Replied,
    Bounced,
    Unsubscribed,
    Cancelled,
    Failed,
}

impl EnrollmentStatus {
    /// Whether the enrollment still advances through steps
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}

/// One contact enrolled in one sequence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceEnrollment {
    pub id: String,
    pub tenant_id: String,
    pub sequence_id: String,
    pub contact_id: String,
    pub user_id: String,
    pub status: EnrollmentStatus,
    /// 1-based step cursor
    pub current_step: u32,
    pub total_steps: u32,
    pub next_scheduled_at: Option<DateTime<Utc>>,
    pub last_outbound_at: Option<DateTime<Utc>>,
}

/// The kind of touch a sequence step performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepType {
    Email,
    Wait,
    Task,
    LinkedinConnect,
    LinkedinMessage,
    LinkedinVisit,
}

impl StepType {
    /// Whether this step produces an automated external send
    pub fn sends_email(&self) -> bool {
        matches!(self, Self::Email)
    }
}

/// One step of an outreach sequence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceStep {
    pub sequence_id: String,
    /// 1-based position in the sequence
    pub number: u32,
    pub step_type: StepType,
    pub enabled: bool,
    pub delay_days: u32,
    pub delay_hours: u32,
    pub subject: Option<String>,
    pub body: String,
}

impl SequenceStep {
    /// Delay before this step executes, in milliseconds
    pub fn delay_ms(&self) -> u64 {
        self.delay_days as u64 * 86_400_000 + self.delay_hours as u64 * 3_600_000
    }
}

/// Partial update applied to an enrollment row
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnrollmentUpdate {
    pub status: Option<EnrollmentStatus>,
    pub current_step: Option<u32>,
    /// `Some(None)` clears the scheduled time
    pub next_scheduled_at: Option<Option<DateTime<Utc>>>,
    pub last_outbound_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl EnrollmentUpdate {
    pub fn status(status: EnrollmentStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }
}

/// Events recorded on an enrollment's timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentEventKind {
    EmailSent,
    EmailBounced,
    ReplyDetected,
    StepSkipped,
    /// WAIT / TASK / LINKEDIN_* steps require manual follow-through
    ManualStepQueued,
}

/// Downloaded recording artifact for a finished meeting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingAsset {
    pub media_url: String,
    pub transcript_text: Option<String>,
}

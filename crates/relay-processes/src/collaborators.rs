//! Collaborator seams to the enclosing CRM and external providers
//!
//! The processes only ever touch the outside world through these traits. The
//! embedding application owns the concrete clients (database pool, HTTP
//! providers) and passes them in explicitly; there is no ambient global
//! client state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{
    EnrollmentEventKind, EnrollmentUpdate, Meeting, MeetingStatus, RecordingAsset,
    SequenceEnrollment, SequenceStep,
};

/// Key-based CRUD over the CRM's relational records
#[async_trait]
pub trait CrmStore: Send + Sync + 'static {
    // Meetings
    async fn meeting(&self, meeting_id: &str) -> anyhow::Result<Meeting>;
    async fn update_meeting_status(
        &self,
        meeting_id: &str,
        status: MeetingStatus,
        error_message: Option<String>,
    ) -> anyhow::Result<()>;
    async fn set_meeting_bot(&self, meeting_id: &str, bot_id: &str) -> anyhow::Result<()>;
    async fn set_meeting_recording(&self, meeting_id: &str, media_url: &str)
        -> anyhow::Result<()>;
    async fn save_meeting_transcript(
        &self,
        meeting_id: &str,
        transcript: &str,
    ) -> anyhow::Result<()>;

    // Sequence enrollments
    async fn enrollment(&self, enrollment_id: &str) -> anyhow::Result<SequenceEnrollment>;
    async fn sequence_step(
        &self,
        sequence_id: &str,
        number: u32,
    ) -> anyhow::Result<Option<SequenceStep>>;
    async fn update_enrollment(
        &self,
        enrollment_id: &str,
        update: EnrollmentUpdate,
    ) -> anyhow::Result<()>;
    async fn record_enrollment_event(
        &self,
        enrollment_id: &str,
        kind: EnrollmentEventKind,
        detail: serde_json::Value,
    ) -> anyhow::Result<()>;

    // Contacts and mail connections
    async fn contact_email(&self, contact_id: &str) -> anyhow::Result<String>;
    async fn email_access_token(&self, user_id: &str) -> anyhow::Result<String>;

    /// Authoritative reply check: any inbound message from the contact
    /// strictly after `after`. Cached timestamp fields on the enrollment are
    /// a fast-path hint only and are never consulted for decisions.
    async fn has_inbound_message_after(
        &self,
        contact_id: &str,
        after: DateTime<Utc>,
    ) -> anyhow::Result<bool>;
}

/// External meeting-recording-bot provider
#[async_trait]
pub trait RecordingBotClient: Send + Sync + 'static {
    /// Create a bot that will join the meeting and post status webhooks
    async fn create_bot(&self, meeting_url: &str, webhook_url: &str) -> anyhow::Result<String>;

    /// Fetch the finished recording artifact
    async fn fetch_recording(&self, bot_id: &str) -> anyhow::Result<RecordingAsset>;
}

/// An outbound sequence email
#[derive(Debug, Clone)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Provider identifiers for a sent message
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SendReceipt {
    pub external_id: String,
    pub external_thread_id: Option<String>,
}

/// Email send failures, with bounces distinguishable from transient faults
#[derive(Debug, thiserror::Error)]
pub enum EmailSendError {
    /// Hard bounce / invalid recipient; never retried
    #[error("recipient rejected: {0}")]
    Bounced(String),

    /// Anything else (rate limits, transport faults); retryable
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Email provider used by EMAIL sequence steps
#[async_trait]
pub trait EmailClient: Send + Sync + 'static {
    async fn send(
        &self,
        access_token: &str,
        message: &OutboundEmail,
    ) -> Result<SendReceipt, EmailSendError>;
}

/// Fire-and-forget handoff to the insights-generation pipeline
#[async_trait]
pub trait InsightsClient: Send + Sync + 'static {
    async fn trigger(
        &self,
        meeting_id: &str,
        tenant_id: &str,
        user_id: &str,
    ) -> anyhow::Result<()>;
}

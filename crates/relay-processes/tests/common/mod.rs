//! Shared test harness: in-memory engine plus hand-written mock collaborators

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use relay_durable::{
    InMemoryWorkflowStore, WorkerPool, WorkerPoolConfig, WorkflowExecutor, WorkflowStore,
};
use relay_processes::collaborators::*;
use relay_processes::domain::*;
use relay_processes::{register_activities, register_workflows, ProcessDeps};

// =============================================================================
// Mock CRM store
// =============================================================================

#[derive(Default)]
pub struct MockCrm {
    pub meetings: Mutex<HashMap<String, Meeting>>,
    pub enrollments: Mutex<HashMap<String, SequenceEnrollment>>,
    pub steps: Mutex<HashMap<(String, u32), SequenceStep>>,
    pub events: Mutex<Vec<(String, EnrollmentEventKind, serde_json::Value)>>,
    pub transcripts: Mutex<HashMap<String, String>>,
    /// contact_id -> timestamp of their latest inbound message
    pub inbound: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl MockCrm {
    pub fn with_meeting(self, meeting: Meeting) -> Self {
        self.meetings.lock().insert(meeting.id.clone(), meeting);
        self
    }

    pub fn with_enrollment(self, enrollment: SequenceEnrollment) -> Self {
        self.enrollments
            .lock()
            .insert(enrollment.id.clone(), enrollment);
        self
    }

    pub fn with_step(self, step: SequenceStep) -> Self {
        self.steps
            .lock()
            .insert((step.sequence_id.clone(), step.number), step);
        self
    }

    pub fn event_kinds(&self, enrollment_id: &str) -> Vec<EnrollmentEventKind> {
        self.events
            .lock()
            .iter()
            .filter(|(id, _, _)| id == enrollment_id)
            .map(|(_, kind, _)| *kind)
            .collect()
    }
}

#[async_trait]
impl CrmStore for MockCrm {
    async fn meeting(&self, meeting_id: &str) -> anyhow::Result<Meeting> {
        self.meetings
            .lock()
            .get(meeting_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("meeting not found: {meeting_id}"))
    }

    async fn update_meeting_status(
        &self,
        meeting_id: &str,
        status: MeetingStatus,
        error_message: Option<String>,
    ) -> anyhow::Result<()> {
        let mut meetings = self.meetings.lock();
        let meeting = meetings
            .get_mut(meeting_id)
            .ok_or_else(|| anyhow::anyhow!("meeting not found: {meeting_id}"))?;
        meeting.status = status;
        if error_message.is_some() {
            meeting.error_message = error_message;
        }
        Ok(())
    }

    async fn set_meeting_bot(&self, meeting_id: &str, bot_id: &str) -> anyhow::Result<()> {
        let mut meetings = self.meetings.lock();
        let meeting = meetings
            .get_mut(meeting_id)
            .ok_or_else(|| anyhow::anyhow!("meeting not found: {meeting_id}"))?;
        meeting.bot_id = Some(bot_id.to_string());
        Ok(())
    }

    async fn set_meeting_recording(
        &self,
        meeting_id: &str,
        media_url: &str,
    ) -> anyhow::Result<()> {
        let mut meetings = self.meetings.lock();
        let meeting = meetings
            .get_mut(meeting_id)
            .ok_or_else(|| anyhow::anyhow!("meeting not found: {meeting_id}"))?;
        meeting.recording_url = Some(media_url.to_string());
        Ok(())
    }

    async fn save_meeting_transcript(
        &self,
        meeting_id: &str,
        transcript: &str,
    ) -> anyhow::Result<()> {
        self.transcripts
            .lock()
            .insert(meeting_id.to_string(), transcript.to_string());
        Ok(())
    }

    async fn enrollment(&self, enrollment_id: &str) -> anyhow::Result<SequenceEnrollment> {
        self.enrollments
            .lock()
            .get(enrollment_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("enrollment not found: {enrollment_id}"))
    }

    async fn sequence_step(
        &self,
        sequence_id: &str,
        number: u32,
    ) -> anyhow::Result<Option<SequenceStep>> {
        Ok(self
            .steps
            .lock()
            .get(&(sequence_id.to_string(), number))
            .cloned())
    }

    async fn update_enrollment(
        &self,
        enrollment_id: &str,
        update: EnrollmentUpdate,
    ) -> anyhow::Result<()> {
        let mut enrollments = self.enrollments.lock();
        let enrollment = enrollments
            .get_mut(enrollment_id)
            .ok_or_else(|| anyhow::anyhow!("enrollment not found: {enrollment_id}"))?;

        if let Some(status) = update.status {
            enrollment.status = status;
        }
        if let Some(step) = update.current_step {
            enrollment.current_step = step;
        }
        if let Some(next) = update.next_scheduled_at {
            enrollment.next_scheduled_at = next;
        }
        if let Some(last) = update.last_outbound_at {
            enrollment.last_outbound_at = Some(last);
        }
        Ok(())
    }

    async fn record_enrollment_event(
        &self,
        enrollment_id: &str,
        kind: EnrollmentEventKind,
        detail: serde_json::Value,
    ) -> anyhow::Result<()> {
        self.events
            .lock()
            .push((enrollment_id.to_string(), kind, detail));
        Ok(())
    }

    async fn contact_email(&self, contact_id: &str) -> anyhow::Result<String> {
        Ok(format!("{contact_id}@example.com"))
    }

    async fn email_access_token(&self, _user_id: &str) -> anyhow::Result<String> {
        Ok("token".to_string())
    }

    async fn has_inbound_message_after(
        &self,
        contact_id: &str,
        after: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        Ok(self
            .inbound
            .lock()
            .get(contact_id)
            .map(|ts| *ts > after)
            .unwrap_or(false))
    }
}

// =============================================================================
// Mock providers
// =============================================================================

#[derive(Default)]
pub struct MockRecorder {
    pub created: Mutex<Vec<(String, String)>>,
    pub fail_create: AtomicBool,
}

#[async_trait]
impl RecordingBotClient for MockRecorder {
    async fn create_bot(&self, meeting_url: &str, webhook_url: &str) -> anyhow::Result<String> {
        if self.fail_create.load(Ordering::SeqCst) {
            anyhow::bail!("bot provider unavailable");
        }
        let mut created = self.created.lock();
        created.push((meeting_url.to_string(), webhook_url.to_string()));
        Ok(format!("bot-{}", created.len()))
    }

    async fn fetch_recording(&self, bot_id: &str) -> anyhow::Result<RecordingAsset> {
        Ok(RecordingAsset {
            media_url: format!("https://assets.example/{bot_id}.mp4"),
            transcript_text: Some("transcript".to_string()),
        })
    }
}

#[derive(Default)]
pub struct MockEmail {
    pub sent: Mutex<Vec<OutboundEmail>>,
    pub attempts: AtomicU32,
    pub bounce: AtomicBool,
    /// Fail this many attempts with a transient error before succeeding
    pub transient_failures: AtomicU32,
}

#[async_trait]
impl EmailClient for MockEmail {
    async fn send(
        &self,
        _access_token: &str,
        message: &OutboundEmail,
    ) -> Result<SendReceipt, EmailSendError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;

        if self.bounce.load(Ordering::SeqCst) {
            return Err(EmailSendError::Bounced("mailbox unavailable".to_string()));
        }
        if attempt <= self.transient_failures.load(Ordering::SeqCst) {
            return Err(EmailSendError::Other(anyhow::anyhow!("smtp 451")));
        }

        self.sent.lock().push(message.clone());
        Ok(SendReceipt {
            external_id: format!("msg-{attempt}"),
            external_thread_id: None,
        })
    }
}

#[derive(Default)]
pub struct MockInsights {
    pub triggered: Mutex<Vec<String>>,
}

#[async_trait]
impl InsightsClient for MockInsights {
    async fn trigger(
        &self,
        meeting_id: &str,
        _tenant_id: &str,
        _user_id: &str,
    ) -> anyhow::Result<()> {
        self.triggered.lock().push(meeting_id.to_string());
        Ok(())
    }
}

// =============================================================================
// Harness
// =============================================================================

pub struct Harness {
    pub store: Arc<InMemoryWorkflowStore>,
    pub executor: Arc<WorkflowExecutor<InMemoryWorkflowStore>>,
    pub pool: WorkerPool<InMemoryWorkflowStore>,
    pub crm: Arc<MockCrm>,
    pub recorder: Arc<MockRecorder>,
    pub email: Arc<MockEmail>,
    pub insights: Arc<MockInsights>,
}

impl Harness {
    pub fn new(crm: MockCrm) -> Self {
        let store = Arc::new(InMemoryWorkflowStore::new());
        let mut executor = WorkflowExecutor::new(store.clone());
        register_workflows(&mut executor);
        let executor = Arc::new(executor);

        let crm = Arc::new(crm);
        let recorder = Arc::new(MockRecorder::default());
        let email = Arc::new(MockEmail::default());
        let insights = Arc::new(MockInsights::default());

        let pool = WorkerPool::new(executor.clone(), WorkerPoolConfig::default());
        register_activities(
            &pool,
            &ProcessDeps {
                crm: crm.clone(),
                recorder: recorder.clone(),
                email: email.clone(),
                insights: insights.clone(),
                bot_webhook_url: "https://app.example/webhooks/bot".to_string(),
            },
        );

        Self {
            store,
            executor,
            pool,
            crm,
            recorder,
            email,
            insights,
        }
    }

    /// Run due activities until the queue is quiet
    pub async fn pump(&self) {
        while self.pool.drain_once().await.expect("drain failed") > 0 {}
    }

    /// Fire a pending durable timer by hand (in place of the TimerService)
    pub async fn fire_timer(&self, workflow_id: &str, timer_id: &str) {
        self.store
            .cancel_timer(workflow_id, timer_id)
            .await
            .expect("cancel timer");
        self.executor
            .on_timer_fired(workflow_id, timer_id)
            .await
            .expect("fire timer");
    }
}

// =============================================================================
// Fixtures
// =============================================================================

pub fn meeting(id: &str, scheduled_at: DateTime<Utc>) -> Meeting {
    Meeting {
        id: id.to_string(),
        tenant_id: "tenant-1".to_string(),
        user_id: "user-1".to_string(),
        title: "Pipeline review".to_string(),
        meeting_url: Some("https://meet.example/abc".to_string()),
        scheduled_at,
        status: MeetingStatus::Scheduled,
        bot_id: None,
        recording_url: None,
        error_message: None,
    }
}

pub fn enrollment(id: &str, total_steps: u32) -> SequenceEnrollment {
    SequenceEnrollment {
        id: id.to_string(),
        tenant_id: "tenant-1".to_string(),
        sequence_id: "seq-1".to_string(),
        contact_id: "contact-1".to_string(),
        user_id: "user-1".to_string(),
        status: EnrollmentStatus::Active,
        current_step: 1,
        total_steps,
        next_scheduled_at: None,
        last_outbound_at: None,
    }
}

pub fn email_step(number: u32, delay_days: u32) -> SequenceStep {
    SequenceStep {
        sequence_id: "seq-1".to_string(),
        number,
        step_type: StepType::Email,
        enabled: true,
        delay_days,
        delay_hours: 0,
        subject: Some(format!("Touch {number}")),
        body: "Hi {{firstName}}".to_string(),
    }
}

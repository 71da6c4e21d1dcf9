//! Calendar recording scheduler
//!
//! The driver between calendar sync and the meeting-bot workflow: enumerate
//! upcoming events, consult the recording policy once per event, and start a
//! bot lifecycle for each positive decision. Not durable itself — the
//! deterministic workflow id makes re-runs no-ops, so it can be invoked on
//! any interval with no memory of the previous run.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};

use relay_durable::{StartOutcome, WorkflowExecutor, WorkflowStore};
use relay_processes::{meeting_bot_workflow_id, MeetingBotInput, MeetingBotWorkflow};

use crate::policy::{evaluate, CalendarEvent, PolicyContext};

/// An upcoming synced calendar event with its owning meeting record
#[derive(Debug, Clone)]
pub struct UpcomingMeeting {
    pub meeting_id: String,
    pub tenant_id: String,
    pub user_id: String,
    pub scheduled_at: DateTime<Utc>,
    pub event: CalendarEvent,
}

/// Calendar-side collaborator
#[async_trait]
pub trait CalendarSource: Send + Sync + 'static {
    /// Upcoming meetings inside the scheduling horizon
    async fn upcoming_meetings(&self) -> anyhow::Result<Vec<UpcomingMeeting>>;

    /// Effective policy scope for one meeting's owner
    async fn policy_context(
        &self,
        tenant_id: &str,
        user_id: &str,
    ) -> anyhow::Result<PolicyContext>;
}

/// Result of one scheduling pass
#[derive(Debug, Default, PartialEq, Eq)]
pub struct RecorderReport {
    pub evaluated: usize,
    pub started: usize,
    pub already_running: usize,
    pub skipped_by_policy: usize,
}

/// Policy-gated starter for meeting-bot workflows
pub struct RecordingScheduler<S: WorkflowStore> {
    executor: Arc<WorkflowExecutor<S>>,
    calendar: Arc<dyn CalendarSource>,
}

impl<S: WorkflowStore> RecordingScheduler<S> {
    pub fn new(executor: Arc<WorkflowExecutor<S>>, calendar: Arc<dyn CalendarSource>) -> Self {
        Self { executor, calendar }
    }

    /// One pass over the upcoming events
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> anyhow::Result<RecorderReport> {
        let mut report = RecorderReport::default();

        for upcoming in self.calendar.upcoming_meetings().await? {
            report.evaluated += 1;

            let ctx = self
                .calendar
                .policy_context(&upcoming.tenant_id, &upcoming.user_id)
                .await?;
            let decision = evaluate(&ctx, &upcoming.event);

            if !decision.should_record {
                debug!(
                    meeting_id = %upcoming.meeting_id,
                    rule = ?decision.rule,
                    reason = %decision.reason,
                    "not recording"
                );
                report.skipped_by_policy += 1;
                continue;
            }

            // evaluate() already requires a URL for a positive decision
            let meeting_url = upcoming.event.meeting_url.clone().unwrap_or_default();
            let workflow_id = meeting_bot_workflow_id(&upcoming.meeting_id);
            let input = MeetingBotInput {
                meeting_id: upcoming.meeting_id.clone(),
                tenant_id: upcoming.tenant_id.clone(),
                user_id: upcoming.user_id.clone(),
                meeting_url,
                scheduled_at: upcoming.scheduled_at,
            };

            match self
                .executor
                .start_workflow::<MeetingBotWorkflow>(&workflow_id, input)
                .await?
            {
                StartOutcome::Started => {
                    info!(
                        meeting_id = %upcoming.meeting_id,
                        reason = %decision.reason,
                        "scheduled recording bot workflow"
                    );
                    report.started += 1;
                }
                StartOutcome::AlreadyRunning => {
                    report.already_running += 1;
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{Attendee, RecordingPolicy, RecordingRuleType};
    use relay_durable::InMemoryWorkflowStore;

    struct FixedCalendar {
        meetings: Vec<UpcomingMeeting>,
        rule: RecordingRuleType,
    }

    #[async_trait]
    impl CalendarSource for FixedCalendar {
        async fn upcoming_meetings(&self) -> anyhow::Result<Vec<UpcomingMeeting>> {
            Ok(self.meetings.clone())
        }

        async fn policy_context(
            &self,
            _tenant_id: &str,
            _user_id: &str,
        ) -> anyhow::Result<PolicyContext> {
            Ok(PolicyContext {
                user_policy: None,
                tenant_policy: Some(RecordingPolicy::new(self.rule)),
                internal_domains: vec!["acme.com".to_string()],
            })
        }
    }

    fn upcoming(meeting_id: &str, external: bool) -> UpcomingMeeting {
        let other = if external {
            "carol@partner.com"
        } else {
            "dave@acme.com"
        };
        UpcomingMeeting {
            meeting_id: meeting_id.to_string(),
            tenant_id: "tenant-1".to_string(),
            user_id: "user-1".to_string(),
            scheduled_at: Utc::now() + chrono::Duration::minutes(30),
            event: CalendarEvent {
                id: format!("evt-{meeting_id}"),
                title: "Partner call".to_string(),
                meeting_url: Some("https://meet.example/xyz".to_string()),
                attendees: vec![
                    Attendee {
                        email: "bob@acme.com".to_string(),
                        organizer: true,
                    },
                    Attendee {
                        email: other.to_string(),
                        organizer: false,
                    },
                ],
            },
        }
    }

    fn build_scheduler(
        calendar: FixedCalendar,
    ) -> RecordingScheduler<InMemoryWorkflowStore> {
        let store = Arc::new(InMemoryWorkflowStore::new());
        let mut executor = WorkflowExecutor::new(store);
        executor.register::<MeetingBotWorkflow>();
        RecordingScheduler::new(Arc::new(executor), Arc::new(calendar))
    }

    #[tokio::test]
    async fn starts_workflows_for_positive_decisions_only() {
        let scheduler = build_scheduler(FixedCalendar {
            meetings: vec![upcoming("m1", true), upcoming("m2", false)],
            rule: RecordingRuleType::ExternalOnly,
        });

        let report = scheduler.run_once().await.unwrap();
        assert_eq!(report.evaluated, 2);
        assert_eq!(report.started, 1);
        assert_eq!(report.skipped_by_policy, 1);
    }

    #[tokio::test]
    async fn rerun_is_idempotent() {
        let scheduler = build_scheduler(FixedCalendar {
            meetings: vec![upcoming("m1", true)],
            rule: RecordingRuleType::ExternalOnly,
        });

        let first = scheduler.run_once().await.unwrap();
        assert_eq!(first.started, 1);

        // Same pass again: the deterministic workflow id makes it a no-op
        let second = scheduler.run_once().await.unwrap();
        assert_eq!(second.started, 0);
        assert_eq!(second.already_running, 1);
    }
}

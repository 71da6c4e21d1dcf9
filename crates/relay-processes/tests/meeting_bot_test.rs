//! Meeting bot lifecycle scenarios: webhook-driven happy path, cancellation
//! ordering, join timeout, idempotent start.

mod common;

use chrono::Utc;
use serde_json::json;

use common::{meeting, Harness, MockCrm};
use relay_durable::{WorkflowSignal, WorkflowStatus, WorkflowStore};
use relay_processes::domain::MeetingStatus;
use relay_processes::meeting_bot::{bot_status, meeting_bot_workflow_id, signals};
use relay_processes::MeetingBotInput;

fn input_for(meeting: &relay_processes::domain::Meeting) -> MeetingBotInput {
    MeetingBotInput {
        meeting_id: meeting.id.clone(),
        tenant_id: meeting.tenant_id.clone(),
        user_id: meeting.user_id.clone(),
        meeting_url: meeting.meeting_url.clone().unwrap(),
        scheduled_at: meeting.scheduled_at,
    }
}

async fn start(harness: &Harness, input: MeetingBotInput) -> String {
    let workflow_id = meeting_bot_workflow_id(&input.meeting_id);
    harness
        .executor
        .start_workflow::<relay_processes::MeetingBotWorkflow>(&workflow_id, input)
        .await
        .expect("start workflow");
    workflow_id
}

fn status_signal(status: &str) -> WorkflowSignal {
    WorkflowSignal::new(signals::BOT_STATUS_CHANGED, json!({ "status": status }))
}

#[tokio::test]
async fn records_and_processes_a_meeting_end_to_end() {
    let m = meeting("mtg-1", Utc::now() - chrono::Duration::minutes(1));
    let harness = Harness::new(MockCrm::default().with_meeting(m.clone()));

    let wf = start(&harness, input_for(&m)).await;
    harness.pump().await;

    // Bot created once, meeting marked joining
    assert_eq!(harness.recorder.created.lock().len(), 1);
    assert_eq!(
        harness.crm.meetings.lock()["mtg-1"].status,
        MeetingStatus::BotJoining
    );
    assert_eq!(
        harness.crm.meetings.lock()["mtg-1"].bot_id.as_deref(),
        Some("bot-1")
    );

    // Webhook: the bot is in the call
    harness
        .executor
        .signal(&wf, status_signal(bot_status::IN_CALL_RECORDING))
        .await
        .unwrap();
    harness.pump().await;
    assert_eq!(
        harness.crm.meetings.lock()["mtg-1"].status,
        MeetingStatus::Recording
    );

    // Webhook: the call finished; post-processing runs to Ready
    harness
        .executor
        .signal(&wf, status_signal(bot_status::DONE))
        .await
        .unwrap();
    harness.pump().await;

    let meetings = harness.crm.meetings.lock();
    assert_eq!(meetings["mtg-1"].status, MeetingStatus::Ready);
    assert_eq!(
        meetings["mtg-1"].recording_url.as_deref(),
        Some("https://assets.example/bot-1.mp4")
    );
    drop(meetings);

    assert_eq!(
        harness.crm.transcripts.lock().get("mtg-1").map(String::as_str),
        Some("transcript")
    );
    assert_eq!(harness.insights.triggered.lock().as_slice(), ["mtg-1"]);

    let info = harness.store.get_workflow_info(&wf).await.unwrap();
    assert_eq!(info.status, WorkflowStatus::Completed);
}

#[tokio::test]
async fn duplicate_start_creates_one_bot() {
    let m = meeting("mtg-1", Utc::now() - chrono::Duration::minutes(1));
    let harness = Harness::new(MockCrm::default().with_meeting(m.clone()));

    start(&harness, input_for(&m)).await;
    start(&harness, input_for(&m)).await;
    harness.pump().await;

    assert_eq!(harness.recorder.created.lock().len(), 1);
}

#[tokio::test]
async fn future_meeting_waits_before_creating_the_bot() {
    let m = meeting("mtg-1", Utc::now() + chrono::Duration::minutes(10));
    let harness = Harness::new(MockCrm::default().with_meeting(m.clone()));

    let wf = start(&harness, input_for(&m)).await;
    harness.pump().await;

    // No bot yet: the workflow is waiting, re-checking at most every minute
    assert!(harness.recorder.created.lock().is_empty());
    let timers = harness.store.pending_timers(&wf).await.unwrap();
    assert_eq!(timers.len(), 1);
    assert_eq!(timers[0].timer_id, "join-poll");
    assert!(timers[0].fire_at <= Utc::now() + chrono::Duration::seconds(61));
}

#[tokio::test]
async fn cancellation_before_terminal_status_cancels() {
    let m = meeting("mtg-1", Utc::now() - chrono::Duration::minutes(1));
    let harness = Harness::new(MockCrm::default().with_meeting(m.clone()));

    let wf = start(&harness, input_for(&m)).await;
    harness.pump().await;
    harness
        .executor
        .signal(&wf, status_signal(bot_status::IN_CALL_RECORDING))
        .await
        .unwrap();

    let outcome = harness
        .executor
        .signal(&wf, WorkflowSignal::new(signals::CANCEL_BOT, json!({})))
        .await
        .unwrap();
    assert!(outcome.delivered());
    harness.pump().await;

    let info = harness.store.get_workflow_info(&wf).await.unwrap();
    assert_eq!(info.status, WorkflowStatus::Cancelled);
    assert_eq!(
        harness.crm.meetings.lock()["mtg-1"].status,
        MeetingStatus::Cancelled
    );

    // The late terminal status is dropped, not an error
    let outcome = harness
        .executor
        .signal(&wf, status_signal(bot_status::DONE))
        .await
        .unwrap();
    assert!(!outcome.delivered());
}

#[tokio::test]
async fn cancellation_after_terminal_status_is_ignored() {
    let m = meeting("mtg-1", Utc::now() - chrono::Duration::minutes(1));
    let harness = Harness::new(MockCrm::default().with_meeting(m.clone()));

    let wf = start(&harness, input_for(&m)).await;
    harness.pump().await;
    harness
        .executor
        .signal(&wf, status_signal(bot_status::DONE))
        .await
        .unwrap();

    // Cancellation arrives second: the prior signal already decided the outcome
    harness
        .executor
        .signal(&wf, WorkflowSignal::new(signals::CANCEL_BOT, json!({})))
        .await
        .unwrap();
    harness.pump().await;

    let info = harness.store.get_workflow_info(&wf).await.unwrap();
    assert_eq!(info.status, WorkflowStatus::Completed);
    assert_eq!(
        harness.crm.meetings.lock()["mtg-1"].status,
        MeetingStatus::Ready
    );
}

#[tokio::test]
async fn join_timeout_leaves_a_terminal_non_ready_state() {
    let m = meeting("mtg-1", Utc::now() - chrono::Duration::minutes(1));
    let harness = Harness::new(MockCrm::default().with_meeting(m.clone()));

    let wf = start(&harness, input_for(&m)).await;
    harness.pump().await;

    // No status webhook within five minutes of bot creation
    harness.fire_timer(&wf, "join-timeout").await;
    harness.pump().await;

    let info = harness.store.get_workflow_info(&wf).await.unwrap();
    assert_eq!(info.status, WorkflowStatus::Failed);

    let meetings = harness.crm.meetings.lock();
    assert_eq!(meetings["mtg-1"].status, MeetingStatus::Failed);
    assert!(meetings["mtg-1"]
        .error_message
        .as_deref()
        .unwrap()
        .contains("5 minutes"));
}

#[tokio::test]
async fn fatal_status_fails_with_reason_on_the_meeting() {
    let m = meeting("mtg-1", Utc::now() - chrono::Duration::minutes(1));
    let harness = Harness::new(MockCrm::default().with_meeting(m.clone()));

    let wf = start(&harness, input_for(&m)).await;
    harness.pump().await;
    harness
        .executor
        .signal(&wf, status_signal(bot_status::FATAL))
        .await
        .unwrap();
    harness.pump().await;

    let info = harness.store.get_workflow_info(&wf).await.unwrap();
    assert_eq!(info.status, WorkflowStatus::Failed);
    assert_eq!(
        harness.crm.meetings.lock()["mtg-1"].status,
        MeetingStatus::Failed
    );
    // No processing ever ran
    assert!(harness.insights.triggered.lock().is_empty());
}

#[tokio::test]
async fn recording_timeout_fails_the_instance() {
    let m = meeting("mtg-1", Utc::now() - chrono::Duration::minutes(1));
    let harness = Harness::new(MockCrm::default().with_meeting(m.clone()));

    let wf = start(&harness, input_for(&m)).await;
    harness.pump().await;
    harness
        .executor
        .signal(&wf, status_signal(bot_status::IN_CALL_RECORDING))
        .await
        .unwrap();
    harness.pump().await;

    harness.fire_timer(&wf, "recording-timeout").await;
    harness.pump().await;

    let info = harness.store.get_workflow_info(&wf).await.unwrap();
    assert_eq!(info.status, WorkflowStatus::Failed);
    assert!(harness.crm.meetings.lock()["mtg-1"]
        .error_message
        .as_deref()
        .unwrap()
        .contains("4 hours"));
}

//! Sequence enrollment scenarios: immediate first touch, durable delays,
//! reply detection, bounce short-circuit, and bounded history.

mod common;

use std::sync::atomic::Ordering;

use chrono::Utc;

use common::{email_step, enrollment, Harness, MockCrm};
use relay_durable::{WorkflowStatus, WorkflowStore};
use relay_processes::domain::{EnrollmentEventKind, EnrollmentStatus, SequenceStep, StepType};
use relay_processes::sequence::sequence_workflow_id;
use relay_processes::SequenceEnrollmentInput;

async fn start(harness: &Harness, enrollment_id: &str) -> String {
    let workflow_id = sequence_workflow_id(enrollment_id);
    harness
        .executor
        .start_workflow::<relay_processes::SequenceEnrollmentWorkflow>(
            &workflow_id,
            SequenceEnrollmentInput {
                enrollment_id: enrollment_id.to_string(),
            },
        )
        .await
        .expect("start workflow");
    workflow_id
}

#[tokio::test]
async fn two_step_sequence_with_a_delay_runs_to_completion() {
    let crm = MockCrm::default()
        .with_enrollment(enrollment("enr-1", 2))
        .with_step(email_step(1, 0))
        .with_step(email_step(2, 1));
    let harness = Harness::new(crm);

    let wf = start(&harness, "enr-1").await;
    harness.pump().await;

    // Step 1 sent immediately; the enrollment is parked a day out on step 2
    assert_eq!(harness.email.sent.lock().len(), 1);
    {
        let enrollments = harness.crm.enrollments.lock();
        let enr = &enrollments["enr-1"];
        assert_eq!(enr.status, EnrollmentStatus::Active);
        assert_eq!(enr.current_step, 2);
        let next = enr.next_scheduled_at.expect("next_scheduled_at set");
        let expected = Utc::now() + chrono::Duration::days(1);
        assert!((next - expected).num_seconds().abs() < 60);
    }

    // The continuation generation is waiting on the durable step delay
    let timers = harness.store.pending_timers(&wf).await.unwrap();
    assert_eq!(timers.len(), 1);
    assert_eq!(timers[0].timer_id, "step-delay");
    let info = harness.store.get_workflow_info(&wf).await.unwrap();
    assert_eq!(info.status, WorkflowStatus::Running);
    assert_eq!(info.run_count, 2);

    // A day later, no reply: step 2 sends and the enrollment completes
    harness.fire_timer(&wf, "step-delay").await;
    harness.pump().await;

    assert_eq!(harness.email.sent.lock().len(), 2);
    assert_eq!(
        harness.crm.enrollments.lock()["enr-1"].status,
        EnrollmentStatus::Completed
    );
    let info = harness.store.get_workflow_info(&wf).await.unwrap();
    assert_eq!(info.status, WorkflowStatus::Completed);
}

#[tokio::test]
async fn bounce_completes_as_bounced_after_exactly_one_attempt() {
    let crm = MockCrm::default()
        .with_enrollment(enrollment("enr-1", 2))
        .with_step(email_step(1, 0))
        .with_step(email_step(2, 1));
    let harness = Harness::new(crm);
    harness.email.bounce.store(true, Ordering::SeqCst);

    let wf = start(&harness, "enr-1").await;
    harness.pump().await;

    // One attempt, no retries to exhaustion
    assert_eq!(harness.email.attempts.load(Ordering::SeqCst), 1);

    let enrollments = harness.crm.enrollments.lock();
    assert_eq!(enrollments["enr-1"].status, EnrollmentStatus::Bounced);
    drop(enrollments);

    assert!(harness
        .crm
        .event_kinds("enr-1")
        .contains(&EnrollmentEventKind::EmailBounced));

    // Bounce is a business outcome, not a process failure
    let info = harness.store.get_workflow_info(&wf).await.unwrap();
    assert_eq!(info.status, WorkflowStatus::Completed);
}

#[tokio::test]
async fn transient_send_failure_retries_then_succeeds() {
    let crm = MockCrm::default()
        .with_enrollment(enrollment("enr-1", 1))
        .with_step(email_step(1, 0));
    let harness = Harness::new(crm);
    harness.email.transient_failures.store(1, Ordering::SeqCst);

    let wf = start(&harness, "enr-1").await;

    // The first attempt fails; the retry is parked ~1s out by the backoff
    // policy, so keep pumping until it lands
    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    loop {
        harness.pump().await;
        let info = harness.store.get_workflow_info(&wf).await.unwrap();
        if info.status != WorkflowStatus::Running {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "retry never became due"
        );
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }

    assert_eq!(harness.email.attempts.load(Ordering::SeqCst), 2);
    assert_eq!(harness.email.sent.lock().len(), 1);
    assert_eq!(
        harness.crm.enrollments.lock()["enr-1"].status,
        EnrollmentStatus::Completed
    );
}

#[tokio::test]
async fn reply_during_the_wait_stops_the_sequence() {
    let crm = MockCrm::default()
        .with_enrollment(enrollment("enr-1", 2))
        .with_step(email_step(1, 0))
        .with_step(email_step(2, 1));
    let harness = Harness::new(crm);

    let wf = start(&harness, "enr-1").await;
    harness.pump().await;
    assert_eq!(harness.email.sent.lock().len(), 1);

    // The contact replies while the step-2 delay is pending
    harness
        .crm
        .inbound
        .lock()
        .insert("contact-1".to_string(), Utc::now());

    harness.fire_timer(&wf, "step-delay").await;
    harness.pump().await;

    // No second send; the reply check flipped the enrollment itself
    assert_eq!(harness.email.sent.lock().len(), 1);
    assert_eq!(
        harness.crm.enrollments.lock()["enr-1"].status,
        EnrollmentStatus::Replied
    );
    assert!(harness
        .crm
        .event_kinds("enr-1")
        .contains(&EnrollmentEventKind::ReplyDetected));

    let info = harness.store.get_workflow_info(&wf).await.unwrap();
    assert_eq!(info.status, WorkflowStatus::Completed);
    assert!(info.error.is_none());
}

#[tokio::test]
async fn paused_enrollment_terminates_silently() {
    let mut enr = enrollment("enr-1", 2);
    enr.status = EnrollmentStatus::Paused;
    let crm = MockCrm::default()
        .with_enrollment(enr)
        .with_step(email_step(1, 0));
    let harness = Harness::new(crm);

    let wf = start(&harness, "enr-1").await;
    harness.pump().await;

    assert!(harness.email.sent.lock().is_empty());
    let info = harness.store.get_workflow_info(&wf).await.unwrap();
    assert_eq!(info.status, WorkflowStatus::Completed);
    assert!(info.error.is_none());
    // The enrollment row was left alone
    assert_eq!(
        harness.crm.enrollments.lock()["enr-1"].status,
        EnrollmentStatus::Paused
    );
}

#[tokio::test]
async fn disabled_step_is_skipped_without_delay() {
    let mut step1 = email_step(1, 0);
    step1.enabled = false;
    let crm = MockCrm::default()
        .with_enrollment(enrollment("enr-1", 2))
        .with_step(step1)
        .with_step(email_step(2, 0));
    let harness = Harness::new(crm);

    let wf = start(&harness, "enr-1").await;
    harness.pump().await;

    // Only the enabled second step sent anything
    let sent = harness.email.sent.lock();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "Touch 2");
    drop(sent);

    assert_eq!(
        harness.crm.enrollments.lock()["enr-1"].status,
        EnrollmentStatus::Completed
    );
    let info = harness.store.get_workflow_info(&wf).await.unwrap();
    assert_eq!(info.status, WorkflowStatus::Completed);
}

#[tokio::test]
async fn non_email_steps_record_events_only() {
    let step = SequenceStep {
        sequence_id: "seq-1".to_string(),
        number: 1,
        step_type: StepType::LinkedinConnect,
        enabled: true,
        delay_days: 0,
        delay_hours: 0,
        subject: None,
        body: "connection note".to_string(),
    };
    let crm = MockCrm::default()
        .with_enrollment(enrollment("enr-1", 1))
        .with_step(step);
    let harness = Harness::new(crm);

    start(&harness, "enr-1").await;
    harness.pump().await;

    assert!(harness.email.sent.lock().is_empty());
    assert!(harness
        .crm
        .event_kinds("enr-1")
        .contains(&EnrollmentEventKind::ManualStepQueued));
    assert_eq!(
        harness.crm.enrollments.lock()["enr-1"].status,
        EnrollmentStatus::Completed
    );
}

#[tokio::test]
async fn missing_step_closes_the_enrollment_completed() {
    // Cursor points past any configured step
    let mut enr = enrollment("enr-1", 3);
    enr.current_step = 2;
    let crm = MockCrm::default().with_enrollment(enr);
    let harness = Harness::new(crm);

    let wf = start(&harness, "enr-1").await;
    harness.pump().await;

    assert_eq!(
        harness.crm.enrollments.lock()["enr-1"].status,
        EnrollmentStatus::Completed
    );
    let info = harness.store.get_workflow_info(&wf).await.unwrap();
    assert_eq!(info.status, WorkflowStatus::Completed);
}

#[tokio::test]
async fn fifty_steps_keep_history_bounded() {
    let mut crm = MockCrm::default().with_enrollment(enrollment("enr-1", 50));
    for n in 1..=50 {
        crm = crm.with_step(email_step(n, 0));
    }
    let harness = Harness::new(crm);

    let wf = start(&harness, "enr-1").await;

    // Drain one claim batch at a time, tracking the history high-water mark
    let mut max_events = harness.store.load_events(&wf).await.unwrap().len();
    loop {
        let ran = harness.pool.drain_once().await.unwrap();
        max_events = max_events.max(harness.store.load_events(&wf).await.unwrap().len());
        if ran == 0 {
            break;
        }
    }

    assert_eq!(harness.email.sent.lock().len(), 50);
    assert_eq!(
        harness.crm.enrollments.lock()["enr-1"].status,
        EnrollmentStatus::Completed
    );

    let info = harness.store.get_workflow_info(&wf).await.unwrap();
    assert_eq!(info.status, WorkflowStatus::Completed);
    // One continuation per step boundary: identity and the durable counter
    // survive, history does not accumulate
    assert_eq!(info.run_count, 50);
    assert!(
        max_events <= 8,
        "history grew past one cycle's worth: {max_events}"
    );
}

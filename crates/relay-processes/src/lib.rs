//! # Relay CRM processes
//!
//! The workflow definitions that drive Relay's long-running CRM machinery on
//! top of [`relay_durable`]:
//!
//! - [`MeetingBotWorkflow`](meeting_bot::MeetingBotWorkflow) — schedules,
//!   joins, records and post-processes one meeting via an external recording
//!   bot, driven by webhook signals
//! - [`SequenceEnrollmentWorkflow`](sequence::SequenceEnrollmentWorkflow) —
//!   advances one contact through a multi-step outreach sequence, using
//!   continue-as-new so months-long enrollments keep constant history
//!
//! The CRM store and the external providers (recording bot, email, insights
//! generation) are collaborator traits in [`collaborators`]; the embedding
//! application constructs them and passes a [`ProcessDeps`] into
//! [`register_activities`].

pub mod activities;
pub mod collaborators;
pub mod domain;
pub mod meeting_bot;
pub mod sequence;

pub use activities::{register_activities, ProcessDeps};
pub use collaborators::{
    CrmStore, EmailClient, EmailSendError, InsightsClient, OutboundEmail, RecordingBotClient,
    SendReceipt,
};
pub use domain::{
    EnrollmentEventKind, EnrollmentStatus, EnrollmentUpdate, Meeting, MeetingStatus,
    RecordingAsset, SequenceEnrollment, SequenceStep, StepType,
};
pub use meeting_bot::{meeting_bot_workflow_id, MeetingBotInput, MeetingBotWorkflow};
pub use sequence::{sequence_workflow_id, SequenceEnrollmentInput, SequenceEnrollmentWorkflow};

use relay_durable::{WorkflowExecutor, WorkflowStore};

/// Register both process definitions on an executor
pub fn register_workflows<S: WorkflowStore>(executor: &mut WorkflowExecutor<S>) {
    executor.register::<MeetingBotWorkflow>();
    executor.register::<SequenceEnrollmentWorkflow>();
}

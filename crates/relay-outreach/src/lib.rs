//! # Relay outreach decisioning
//!
//! Three non-durable components that sit beside the workflow engine:
//!
//! - [`policy`] — the pure recording-policy evaluator consulted before any
//!   meeting bot is created
//! - [`recorder`] — the calendar recording scheduler: evaluates the policy
//!   per upcoming event and idempotently starts meeting-bot workflows
//! - [`campaign`] — the periodic LinkedIn campaign scheduler: safe to re-run
//!   on any interval, creates at most one pending action per lead

pub mod campaign;
pub mod policy;
pub mod recorder;

pub use campaign::{
    Campaign, CampaignLead, CampaignScheduler, CampaignStatus, CampaignStep, CampaignStore,
    LeadContact, LeadStatus, LeadUpdate, LinkedInActionType, NewLinkedInAction, SchedulerReport,
    SendingWindow,
};
pub use policy::{
    evaluate, Attendee, CalendarEvent, PolicyContext, RecordingDecision, RecordingPolicy,
    RecordingRuleType,
};
pub use recorder::{CalendarSource, RecorderReport, RecordingScheduler, UpcomingMeeting};

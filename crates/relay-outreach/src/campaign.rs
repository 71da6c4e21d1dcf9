//! LinkedIn campaign scheduler
//!
//! A periodic batch driver, not a durable process: every pass inspects
//! campaign and lead state and enqueues the next action per lead, assuming
//! nothing about the previous run. Idempotency rests on two guards — a lead
//! with a pending/in-progress action is skipped, and the daily action budget
//! is recomputed from the store each pass — so overlapping or re-run passes
//! never double-create actions.

use std::sync::Arc;
use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, FixedOffset, Timelike, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

/// Campaign status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    Active,
    Paused,
    Completed,
}

/// Day-of-week + hour-range sending window, in the tenant's local offset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendingWindow {
    /// ISO weekday numbers, Monday = 1 through Sunday = 7
    pub days: Vec<u8>,
    /// Inclusive start hour (local)
    pub start_hour: u32,
    /// Exclusive end hour (local)
    pub end_hour: u32,
    /// Tenant-local UTC offset, minutes east
    pub utc_offset_minutes: i32,
}

impl SendingWindow {
    /// Whether `now` falls inside the window
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let offset = FixedOffset::east_opt(self.utc_offset_minutes * 60)
            .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset"));
        let local = now.with_timezone(&offset);

        let weekday = local.weekday().number_from_monday() as u8;
        let hour = local.hour();

        self.days.contains(&weekday) && hour >= self.start_hour && hour < self.end_hour
    }
}

/// A LinkedIn outreach campaign
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: String,
    pub tenant_id: String,
    pub status: CampaignStatus,
    /// A sending account is linked and authorized
    pub sender_connected: bool,
    /// Maximum actions created per local day
    pub daily_limit: u32,
    pub window: SendingWindow,
}

/// The automated action a campaign step performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkedInActionType {
    ProfileVisit,
    ConnectionRequest,
    Message,
}

/// One step of a campaign
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignStep {
    /// 1-based position
    pub number: u32,
    pub action: LinkedInActionType,
    pub enabled: bool,
    /// Message / connection-note template with `{{placeholder}}` tokens
    pub template: String,
}

/// Lead progression states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    Pending,
    CheckingProfile,
    ConnectionSent,
    Connected,
    Messaged,
    AwaitingReply,
    Replied,
    Completed,
}

impl LeadStatus {
    /// Statuses where the scheduler decides the next touch
    pub fn awaiting_next_step(&self) -> bool {
        matches!(self, Self::Connected | Self::Messaged | Self::AwaitingReply)
    }
}

/// Contact fields available to personalization
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeadContact {
    pub first_name: String,
    pub last_name: String,
    pub company: String,
    pub title: String,
}

/// One contact enrolled in a campaign
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignLead {
    pub id: String,
    pub campaign_id: String,
    pub status: LeadStatus,
    /// 1-based cursor of the last scheduled step (0 before the first)
    pub current_step: u32,
    pub next_action_at: Option<DateTime<Utc>>,
    pub last_outbound_at: Option<DateTime<Utc>>,
    pub contact: LeadContact,
}

/// A new action for the (external) LinkedIn automation executor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewLinkedInAction {
    pub lead_id: String,
    pub campaign_id: String,
    pub action: LinkedInActionType,
    /// Personalized message / note, where the action type carries one
    pub note: Option<String>,
}

/// Partial update applied to a lead row
#[derive(Debug, Clone, Default)]
pub struct LeadUpdate {
    pub status: Option<LeadStatus>,
    pub current_step: Option<u32>,
    /// `Some(None)` clears the scheduled time
    pub next_action_at: Option<Option<DateTime<Utc>>>,
}

/// Campaign-side storage collaborator
#[async_trait]
pub trait CampaignStore: Send + Sync + 'static {
    /// Campaigns with status Active
    async fn active_campaigns(&self) -> anyhow::Result<Vec<Campaign>>;

    /// A campaign's steps, ordered by number
    async fn campaign_steps(&self, campaign_id: &str) -> anyhow::Result<Vec<CampaignStep>>;

    /// Leads that are brand-new or whose `next_action_at` has elapsed, in a
    /// non-terminal status
    async fn due_leads(
        &self,
        campaign_id: &str,
        limit: u32,
    ) -> anyhow::Result<Vec<CampaignLead>>;

    /// Actions already created today (tenant-local day)
    async fn actions_created_today(&self, campaign_id: &str) -> anyhow::Result<u32>;

    /// Whether the lead has a pending or in-progress action
    async fn has_pending_action(&self, lead_id: &str) -> anyhow::Result<bool>;

    /// Enqueue an action for the external automation executor
    async fn create_action(&self, action: NewLinkedInAction) -> anyhow::Result<()>;

    /// Apply a partial update to a lead
    async fn update_lead(&self, lead_id: &str, update: LeadUpdate) -> anyhow::Result<()>;

    /// Any inbound message from the lead strictly after `after`
    async fn has_inbound_message_after(
        &self,
        lead_id: &str,
        after: DateTime<Utc>,
    ) -> anyhow::Result<bool>;
}

/// Counters from one scheduling pass
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SchedulerReport {
    pub campaigns_considered: usize,
    pub leads_processed: usize,
    pub actions_created: usize,
    pub replies_detected: usize,
    pub leads_completed: usize,
    pub skipped_pending_action: usize,
}

/// The periodic campaign scheduler
pub struct CampaignScheduler {
    store: Arc<dyn CampaignStore>,
}

impl CampaignScheduler {
    pub fn new(store: Arc<dyn CampaignStore>) -> Self {
        Self { store }
    }

    /// One scheduling pass at `now`
    #[instrument(skip(self))]
    pub async fn run_once(&self, now: DateTime<Utc>) -> anyhow::Result<SchedulerReport> {
        let mut report = SchedulerReport::default();

        for campaign in self.store.active_campaigns().await? {
            if !campaign.sender_connected {
                debug!(campaign_id = %campaign.id, "skipping campaign without a connected sender");
                continue;
            }
            if !campaign.window.contains(now) {
                debug!(campaign_id = %campaign.id, "outside sending window");
                continue;
            }

            report.campaigns_considered += 1;

            let used = self.store.actions_created_today(&campaign.id).await?;
            let budget = campaign.daily_limit.saturating_sub(used);
            if budget == 0 {
                debug!(campaign_id = %campaign.id, "daily limit reached");
                continue;
            }

            let steps = self.store.campaign_steps(&campaign.id).await?;
            let leads = self.store.due_leads(&campaign.id, budget).await?;

            for lead in leads {
                report.leads_processed += 1;
                self.process_lead(&campaign, &steps, lead, &mut report)
                    .await?;
            }
        }

        Ok(report)
    }

    async fn process_lead(
        &self,
        campaign: &Campaign,
        steps: &[CampaignStep],
        lead: CampaignLead,
        report: &mut SchedulerReport,
    ) -> anyhow::Result<()> {
        // Idempotency guard: an undelivered action means a previous pass (or
        // a concurrent one) already decided this lead's next touch
        if self.store.has_pending_action(&lead.id).await? {
            report.skipped_pending_action += 1;
            return Ok(());
        }

        match lead.status {
            LeadStatus::Pending => {
                // New lead: an initial profile view plus the first enabled step
                self.store
                    .create_action(NewLinkedInAction {
                        lead_id: lead.id.clone(),
                        campaign_id: campaign.id.clone(),
                        action: LinkedInActionType::ProfileVisit,
                        note: None,
                    })
                    .await?;
                report.actions_created += 1;

                match steps.iter().find(|s| s.enabled) {
                    Some(step) => {
                        self.create_step_action(campaign, &lead, step, report).await?;
                        self.store
                            .update_lead(
                                &lead.id,
                                LeadUpdate {
                                    status: Some(LeadStatus::CheckingProfile),
                                    current_step: Some(step.number),
                                    next_action_at: Some(None),
                                },
                            )
                            .await?;
                    }
                    None => {
                        self.store
                            .update_lead(
                                &lead.id,
                                LeadUpdate {
                                    status: Some(LeadStatus::Completed),
                                    next_action_at: Some(None),
                                    ..Default::default()
                                },
                            )
                            .await?;
                        report.leads_completed += 1;
                    }
                }
            }

            status if status.awaiting_next_step() => {
                // Reply check first: an inbound message after our last
                // outbound ends the lead's automation
                if let Some(last_outbound) = lead.last_outbound_at {
                    if self
                        .store
                        .has_inbound_message_after(&lead.id, last_outbound)
                        .await?
                    {
                        self.store
                            .update_lead(
                                &lead.id,
                                LeadUpdate {
                                    status: Some(LeadStatus::Replied),
                                    next_action_at: Some(None),
                                    ..Default::default()
                                },
                            )
                            .await?;
                        report.replies_detected += 1;
                        info!(lead_id = %lead.id, "reply detected, stopping campaign for lead");
                        return Ok(());
                    }
                }

                match steps.iter().find(|s| s.enabled && s.number > lead.current_step) {
                    Some(step) => {
                        self.create_step_action(campaign, &lead, step, report).await?;
                        self.store
                            .update_lead(
                                &lead.id,
                                LeadUpdate {
                                    current_step: Some(step.number),
                                    next_action_at: Some(None),
                                    ..Default::default()
                                },
                            )
                            .await?;
                    }
                    None => {
                        self.store
                            .update_lead(
                                &lead.id,
                                LeadUpdate {
                                    status: Some(LeadStatus::Completed),
                                    next_action_at: Some(None),
                                    ..Default::default()
                                },
                            )
                            .await?;
                        report.leads_completed += 1;
                    }
                }
            }

            _ => {
                // CheckingProfile / ConnectionSent etc.: the external
                // automation executor owns the next transition
                debug!(lead_id = %lead.id, status = ?lead.status, "lead is mid-action");
            }
        }

        Ok(())
    }

    async fn create_step_action(
        &self,
        campaign: &Campaign,
        lead: &CampaignLead,
        step: &CampaignStep,
        report: &mut SchedulerReport,
    ) -> anyhow::Result<()> {
        let note = match step.action {
            LinkedInActionType::ProfileVisit => None,
            LinkedInActionType::ConnectionRequest | LinkedInActionType::Message => {
                Some(personalize(&step.template, &lead.contact))
            }
        };

        self.store
            .create_action(NewLinkedInAction {
                lead_id: lead.id.clone(),
                campaign_id: campaign.id.clone(),
                action: step.action,
                note,
            })
            .await?;
        report.actions_created += 1;
        Ok(())
    }
}

/// Literal `{{placeholder}}` substitution against the lead's contact record;
/// unresolved placeholders are left verbatim
pub fn personalize(template: &str, contact: &LeadContact) -> String {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    let placeholder = PLACEHOLDER
        .get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}").expect("placeholder regex"));

    placeholder
        .replace_all(template, |caps: &regex::Captures<'_>| {
            match &caps[1] {
                "firstName" => contact.first_name.clone(),
                "lastName" => contact.last_name.clone(),
                "company" => contact.company.clone(),
                "title" => contact.title.clone(),
                _ => caps[0].to_string(),
            }
        })
        .into_owned()
}

//! Recording policy evaluator
//!
//! A pure, synchronous decision function: given the effective policy scope
//! and one calendar event, decide whether a recording bot should be created.
//! No side effects, no engine dependency — the calendar scheduler calls it
//! once per upcoming event.

use serde::{Deserialize, Serialize};

/// Recording rule kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingRuleType {
    /// Record every meeting
    Always,

    /// Never auto-record; users opt in per meeting
    ManualOnly,

    /// Record only meetings with at least one external attendee
    ExternalOnly,

    /// Record only when the title contains one of the keywords
    KeywordInclude,

    /// Record unless the title contains one of the keywords
    KeywordExclude,
}

/// A recording policy, scoped to a tenant or one user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingPolicy {
    pub rule: RecordingRuleType,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl RecordingPolicy {
    pub fn new(rule: RecordingRuleType) -> Self {
        Self {
            rule,
            keywords: vec![],
        }
    }

    pub fn with_keywords(mut self, keywords: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }
}

/// The policy scope an evaluation runs under
///
/// A user-level policy overrides the tenant default; with neither configured
/// the implicit default is `ExternalOnly`.
#[derive(Debug, Clone, Default)]
pub struct PolicyContext {
    pub user_policy: Option<RecordingPolicy>,
    pub tenant_policy: Option<RecordingPolicy>,
    /// The tenant's own email domains; attendees outside them are external
    pub internal_domains: Vec<String>,
}

/// One attendee on a calendar event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attendee {
    pub email: String,
    #[serde(default)]
    pub organizer: bool,
}

/// The slice of a calendar event the policy looks at
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    pub title: String,
    pub meeting_url: Option<String>,
    pub attendees: Vec<Attendee>,
}

/// The evaluator's verdict
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingDecision {
    pub should_record: bool,
    pub reason: String,
    pub rule: RecordingRuleType,
}

impl RecordingDecision {
    fn record(rule: RecordingRuleType, reason: impl Into<String>) -> Self {
        Self {
            should_record: true,
            reason: reason.into(),
            rule,
        }
    }

    fn skip(rule: RecordingRuleType, reason: impl Into<String>) -> Self {
        Self {
            should_record: false,
            reason: reason.into(),
            rule,
        }
    }
}

/// Decide whether this event should get a recording bot
pub fn evaluate(ctx: &PolicyContext, event: &CalendarEvent) -> RecordingDecision {
    let policy = ctx
        .user_policy
        .as_ref()
        .or(ctx.tenant_policy.as_ref())
        .cloned()
        .unwrap_or_else(|| RecordingPolicy::new(RecordingRuleType::ExternalOnly));

    // Nothing to join without a meeting link
    if event.meeting_url.as_deref().unwrap_or("").is_empty() {
        return RecordingDecision::skip(policy.rule, "event has no meeting URL");
    }

    match policy.rule {
        RecordingRuleType::Always => {
            RecordingDecision::record(policy.rule, "policy records all meetings")
        }

        RecordingRuleType::ManualOnly => {
            RecordingDecision::skip(policy.rule, "policy requires manual opt-in")
        }

        RecordingRuleType::ExternalOnly => {
            let external = event.attendees.iter().find(|attendee| {
                !attendee.organizer && !is_internal(&attendee.email, &ctx.internal_domains)
            });
            match external {
                Some(attendee) => RecordingDecision::record(
                    policy.rule,
                    format!("external attendee {}", attendee.email),
                ),
                None => RecordingDecision::skip(policy.rule, "all attendees are internal"),
            }
        }

        RecordingRuleType::KeywordInclude => {
            let title = event.title.to_lowercase();
            let matched = policy
                .keywords
                .iter()
                .find(|kw| !kw.is_empty() && title.contains(&kw.to_lowercase()));
            match matched {
                Some(kw) => {
                    RecordingDecision::record(policy.rule, format!("title matches keyword {kw:?}"))
                }
                // An empty keyword list matches nothing
                None => RecordingDecision::skip(policy.rule, "title matches no include keyword"),
            }
        }

        RecordingRuleType::KeywordExclude => {
            let title = event.title.to_lowercase();
            let matched = policy
                .keywords
                .iter()
                .find(|kw| !kw.is_empty() && title.contains(&kw.to_lowercase()));
            match matched {
                Some(kw) => {
                    RecordingDecision::skip(policy.rule, format!("title matches keyword {kw:?}"))
                }
                // An empty keyword list excludes nothing
                None => RecordingDecision::record(policy.rule, "title matches no exclude keyword"),
            }
        }
    }
}

/// Exact-or-subdomain, case-insensitive domain membership
fn is_internal(email: &str, internal_domains: &[String]) -> bool {
    let domain = match email.rsplit_once('@') {
        Some((_, domain)) => domain.to_lowercase(),
        None => return false,
    };

    internal_domains.iter().any(|internal| {
        let internal = internal.to_lowercase();
        domain == internal || domain.ends_with(&format!(".{internal}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(title: &str, attendees: Vec<Attendee>) -> CalendarEvent {
        CalendarEvent {
            id: "evt-1".to_string(),
            title: title.to_string(),
            meeting_url: Some("https://meet.example/abc".to_string()),
            attendees,
        }
    }

    fn attendee(email: &str, organizer: bool) -> Attendee {
        Attendee {
            email: email.to_string(),
            organizer,
        }
    }

    fn ctx_with(rule: RecordingRuleType, keywords: &[&str]) -> PolicyContext {
        PolicyContext {
            user_policy: None,
            tenant_policy: Some(
                RecordingPolicy::new(rule).with_keywords(keywords.iter().copied()),
            ),
            internal_domains: vec!["acme.com".to_string()],
        }
    }

    #[test]
    fn no_meeting_url_never_records() {
        let mut e = event("Weekly sync", vec![]);
        e.meeting_url = None;
        let decision = evaluate(&ctx_with(RecordingRuleType::Always, &[]), &e);
        assert!(!decision.should_record);
    }

    #[test]
    fn always_records_unconditionally() {
        let e = event("1:1", vec![attendee("bob@acme.com", true)]);
        assert!(evaluate(&ctx_with(RecordingRuleType::Always, &[]), &e).should_record);
    }

    #[test]
    fn manual_only_never_auto_records() {
        let e = event("Demo", vec![attendee("carol@partner.com", false)]);
        assert!(!evaluate(&ctx_with(RecordingRuleType::ManualOnly, &[]), &e).should_record);
    }

    #[test]
    fn external_only_records_with_an_external_attendee() {
        let e = event(
            "Partner demo",
            vec![
                attendee("bob@acme.com", true),
                attendee("carol@partner.com", false),
            ],
        );
        let decision = evaluate(&ctx_with(RecordingRuleType::ExternalOnly, &[]), &e);
        assert!(decision.should_record);
        assert!(decision.reason.contains("carol@partner.com"));
    }

    #[test]
    fn external_only_skips_all_internal_meetings() {
        let e = event(
            "Standup",
            vec![
                attendee("bob@acme.com", false),
                attendee("dave@acme.com", false),
            ],
        );
        assert!(!evaluate(&ctx_with(RecordingRuleType::ExternalOnly, &[]), &e).should_record);
    }

    #[test]
    fn external_only_treats_subdomains_as_internal() {
        let e = event(
            "Eng sync",
            vec![
                attendee("bob@acme.com", true),
                attendee("eve@EU.ACME.com", false),
            ],
        );
        assert!(!evaluate(&ctx_with(RecordingRuleType::ExternalOnly, &[]), &e).should_record);
    }

    #[test]
    fn external_only_ignores_the_organizer_domain_check() {
        // The organizer being external does not by itself trigger recording
        let e = event("Intro", vec![attendee("mallory@other.com", true)]);
        assert!(!evaluate(&ctx_with(RecordingRuleType::ExternalOnly, &[]), &e).should_record);
    }

    #[test]
    fn keyword_include_matches_case_insensitive_substrings() {
        let ctx = ctx_with(RecordingRuleType::KeywordInclude, &["demo", "interview"]);
        assert!(evaluate(&ctx, &event("Product DEMO with Acme", vec![])).should_record);
        assert!(!evaluate(&ctx, &event("Weekly standup", vec![])).should_record);
    }

    #[test]
    fn keyword_include_with_no_keywords_never_matches() {
        let ctx = ctx_with(RecordingRuleType::KeywordInclude, &[]);
        assert!(!evaluate(&ctx, &event("Anything", vec![])).should_record);
    }

    #[test]
    fn keyword_exclude_skips_matching_titles() {
        let ctx = ctx_with(RecordingRuleType::KeywordExclude, &["standup"]);
        assert!(!evaluate(&ctx, &event("Daily Standup", vec![])).should_record);
        assert!(evaluate(&ctx, &event("Customer call", vec![])).should_record);
    }

    #[test]
    fn keyword_exclude_with_no_keywords_always_records() {
        let ctx = ctx_with(RecordingRuleType::KeywordExclude, &[]);
        assert!(evaluate(&ctx, &event("Anything", vec![])).should_record);
    }

    #[test]
    fn user_policy_overrides_tenant_default() {
        let ctx = PolicyContext {
            user_policy: Some(RecordingPolicy::new(RecordingRuleType::Always)),
            tenant_policy: Some(RecordingPolicy::new(RecordingRuleType::ManualOnly)),
            internal_domains: vec!["acme.com".to_string()],
        };
        assert!(evaluate(&ctx, &event("1:1", vec![])).should_record);
    }

    #[test]
    fn implicit_default_is_external_only() {
        let ctx = PolicyContext {
            user_policy: None,
            tenant_policy: None,
            internal_domains: vec!["acme.com".to_string()],
        };

        let external = event("Intro", vec![attendee("carol@partner.com", false)]);
        let decision = evaluate(&ctx, &external);
        assert!(decision.should_record);
        assert_eq!(decision.rule, RecordingRuleType::ExternalOnly);
    }
}

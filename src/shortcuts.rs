//! Voice/automation commands and the sentences they answer with.

use chrono::{DateTime, Utc};

use crate::db::{DbProspect, FlowDb};
use crate::error::FlowError;
use crate::pipeline::{active_due_today, active_hot_leads, active_overdue, Clock};
use crate::services::prospects::{add_prospect, NewProspect};
use crate::types::Platform;
use crate::util::plural;

const HOT_LEAD_NAMES_SHOWN: usize = 5;

/// "How many follow-ups today?"
pub fn follow_up_summary(prospects: &[DbProspect], clock: &Clock) -> String {
    let overdue = active_overdue(prospects, clock).len();
    let total = overdue + active_due_today(prospects, clock).len();
    let hot = active_hot_leads(prospects).len();

    if total == 0 {
        return "You're all caught up! No follow-ups due today.".to_string();
    }
    let mut message = format!("You have {} to do", plural(total, "follow-up"));
    if overdue > 0 {
        message.push_str(&format!(" ({} overdue)", overdue));
    }
    if hot > 0 {
        message.push_str(&format!(". Plus {} to prioritize", plural(hot, "hot lead")));
    }
    message.push('.');
    message
}

/// "Who are my hot leads?"
pub fn hot_leads_summary(prospects: &[DbProspect]) -> String {
    let hot = active_hot_leads(prospects);
    if hot.is_empty() {
        return "You don't have any hot leads right now. Add some prospects and mark them as hot!"
            .to_string();
    }
    let names = hot
        .iter()
        .take(HOT_LEAD_NAMES_SHOWN)
        .map(|p| p.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    if hot.len() <= HOT_LEAD_NAMES_SHOWN {
        format!("Your hot leads are: {}.", names)
    } else {
        format!(
            "You have {} hot leads. Top ones: {}, and {} more.",
            hot.len(),
            names,
            hot.len() - HOT_LEAD_NAMES_SHOWN
        )
    }
}

/// "Add a prospect": same validation and plan gate as the in-app form.
pub fn add_prospect_by_command(
    db: &FlowDb,
    name: &str,
    platform: Platform,
    handle: Option<String>,
    is_hot_lead: bool,
    is_pro: bool,
    now: DateTime<Utc>,
) -> Result<String, FlowError> {
    let mut new = NewProspect::named(name, platform);
    new.handle = handle;
    new.is_hot_lead = is_hot_lead;
    let prospect = add_prospect(db, new, is_pro, now)?;
    Ok(format!(
        "Added {} as a new prospect on {}.",
        prospect.name,
        prospect.platform.display_name()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::{at, test_db};
    use crate::entitlement::{Feature, FREE_PROSPECT_LIMIT};
    use crate::types::FunnelStage;
    use chrono_tz::Tz;

    fn clock() -> Clock {
        Clock::new(at("2025-03-10T15:00:00.000Z"), Tz::UTC)
    }

    fn prospect(name: &str, follow_up: Option<&str>, hot: bool) -> DbProspect {
        let mut p = DbProspect::new(
            name,
            Platform::Instagram,
            FunnelStage::Engaged,
            at("2025-03-01T10:00:00.000Z"),
        );
        p.next_follow_up = follow_up.map(at);
        p.is_hot_lead = hot;
        p
    }

    #[test]
    fn test_follow_up_summary_sentences() {
        assert_eq!(
            follow_up_summary(&[], &clock()),
            "You're all caught up! No follow-ups due today."
        );
        let all = vec![
            prospect("A", Some("2025-03-09T10:00:00.000Z"), true),
            prospect("B", Some("2025-03-10T10:00:00.000Z"), false),
        ];
        assert_eq!(
            follow_up_summary(&all, &clock()),
            "You have 2 follow-ups to do (1 overdue). Plus 1 hot lead to prioritize."
        );
        let one = vec![prospect("B", Some("2025-03-10T10:00:00.000Z"), false)];
        assert_eq!(follow_up_summary(&one, &clock()), "You have 1 follow-up to do.");
    }

    #[test]
    fn test_hot_leads_summary_truncates_after_five() {
        assert!(hot_leads_summary(&[]).starts_with("You don't have any hot leads"));

        let few = vec![prospect("Ann", None, true), prospect("Ben", None, true)];
        assert_eq!(hot_leads_summary(&few), "Your hot leads are: Ann, Ben.");

        let many: Vec<DbProspect> = ["A", "B", "C", "D", "E", "F", "G"]
            .iter()
            .map(|n| prospect(n, None, true))
            .collect();
        assert_eq!(
            hot_leads_summary(&many),
            "You have 7 hot leads. Top ones: A, B, C, D, E, and 2 more."
        );
    }

    #[test]
    fn test_add_by_command_respects_limit() {
        let db = test_db();
        let now = at("2025-03-10T15:00:00.000Z");
        let reply = add_prospect_by_command(
            &db,
            " Jane ",
            Platform::Whatsapp,
            None,
            false,
            false,
            now,
        )
        .unwrap();
        assert_eq!(reply, "Added Jane as a new prospect on WhatsApp.");

        for i in 1..FREE_PROSPECT_LIMIT {
            db.insert_prospect(&prospect(&format!("P{i}"), None, false))
                .unwrap();
        }
        let err = add_prospect_by_command(&db, "One more", Platform::Sms, None, false, false, now)
            .unwrap_err();
        assert!(matches!(err, FlowError::EntitlementDenied(Feature::AddProspect)));
        assert!(add_prospect_by_command(&db, "Pro", Platform::Sms, None, false, true, now).is_ok());
    }
}

//! Home-screen widget digest, published through the shared container.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::bridge::{BridgeError, SharedContainer, WIDGET_DATA_KEY};
use crate::db::DbProspect;
use crate::pipeline::{is_active, is_due_today, is_overdue, Clock};

const UPCOMING_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetProspect {
    pub id: String,
    pub name: String,
    pub handle: Option<String>,
    pub platform: String,
    pub is_hot_lead: bool,
    pub follow_up_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetData {
    pub overdue_count: usize,
    pub today_count: usize,
    pub hot_lead_count: usize,
    pub total_count: usize,
    pub upcoming_prospects: Vec<WidgetProspect>,
    pub last_updated: DateTime<Utc>,
}

pub fn build_widget_data(prospects: &[DbProspect], clock: &Clock) -> WidgetData {
    let active: Vec<&DbProspect> = prospects.iter().filter(|p| is_active(p)).collect();

    let mut upcoming: Vec<&DbProspect> = active
        .iter()
        .copied()
        .filter(|p| is_overdue(p, clock) || is_due_today(p, clock))
        .collect();
    upcoming.sort_by(|a, b| {
        a.next_follow_up
            .cmp(&b.next_follow_up)
            .then_with(|| b.is_hot_lead.cmp(&a.is_hot_lead))
            .then_with(|| a.id.cmp(&b.id))
    });

    WidgetData {
        overdue_count: active.iter().filter(|p| is_overdue(p, clock)).count(),
        today_count: active.iter().filter(|p| is_due_today(p, clock)).count(),
        hot_lead_count: active.iter().filter(|p| p.is_hot_lead).count(),
        total_count: prospects.len(),
        upcoming_prospects: upcoming
            .into_iter()
            .take(UPCOMING_LIMIT)
            .map(|p| WidgetProspect {
                id: p.id.clone(),
                name: p.name.clone(),
                handle: p.handle.clone(),
                platform: p.platform.as_str().to_string(),
                is_hot_lead: p.is_hot_lead,
                follow_up_date: p.next_follow_up,
            })
            .collect(),
        last_updated: clock.now,
    }
}

pub fn publish(
    container: &SharedContainer,
    prospects: &[DbProspect],
    clock: &Clock,
) -> Result<WidgetData, BridgeError> {
    let data = build_widget_data(prospects, clock);
    container.write_json(WIDGET_DATA_KEY, &data)?;
    log::debug!(
        "Updated widget data: {} overdue, {} today",
        data.overdue_count,
        data.today_count
    );
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::at;
    use crate::types::{FunnelStage, Platform};
    use chrono_tz::Tz;

    fn clock() -> Clock {
        Clock::new(at("2025-03-10T15:00:00.000Z"), Tz::UTC)
    }

    fn prospect(name: &str, follow_up: Option<&str>, hot: bool) -> DbProspect {
        let mut p = DbProspect::new(
            name,
            Platform::Facebook,
            FunnelStage::Engaged,
            at("2025-03-01T10:00:00.000Z"),
        );
        p.next_follow_up = follow_up.map(at);
        p.is_hot_lead = hot;
        p
    }

    #[test]
    fn test_upcoming_sorted_by_date_hot_first_on_ties() {
        let all = vec![
            prospect("Cold tie", Some("2025-03-10T09:00:00.000Z"), false),
            prospect("Hot tie", Some("2025-03-10T09:00:00.000Z"), true),
            prospect("Oldest", Some("2025-03-02T09:00:00.000Z"), false),
            prospect("Future", Some("2025-03-11T09:00:00.000Z"), true),
            prospect("No date", None, false),
        ];
        let data = build_widget_data(&all, &clock());
        let names: Vec<&str> = data
            .upcoming_prospects
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(names, vec!["Oldest", "Hot tie", "Cold tie"]);
        assert_eq!(data.overdue_count, 1);
        assert_eq!(data.today_count, 2);
        assert_eq!(data.hot_lead_count, 2);
        assert_eq!(data.total_count, 5);
    }

    #[test]
    fn test_upcoming_capped_at_ten() {
        let all: Vec<DbProspect> = (0..12)
            .map(|i| prospect(&format!("P{i}"), Some("2025-03-09T09:00:00.000Z"), false))
            .collect();
        assert_eq!(build_widget_data(&all, &clock()).upcoming_prospects.len(), 10);
    }

    #[test]
    fn test_publish_writes_shared_document() {
        let dir = tempfile::tempdir().unwrap();
        let container = SharedContainer::new(dir.path());
        let all = vec![prospect("A", Some("2025-03-10T09:00:00.000Z"), false)];
        publish(&container, &all, &clock()).unwrap();

        let stored: WidgetData = container.read_json(WIDGET_DATA_KEY).unwrap().unwrap();
        assert_eq!(stored.today_count, 1);
        assert_eq!(stored.upcoming_prospects[0].platform, "facebook");
    }
}

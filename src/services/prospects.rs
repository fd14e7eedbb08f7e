// Prospect service
// Validated, gated mutations over prospects. Each operation loads, mutates,
// and writes inside one transaction together with any activity it logs.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::db::{stored_instant, DbActivity, DbProspect, FlowDb, WipeSummary};
use crate::entitlement::{can_add_prospect, Feature};
use crate::error::FlowError;
use crate::pipeline::{next_stage, previous_stage};
use crate::types::{ActivityType, FunnelStage, Platform};

/// Fields accepted when creating a prospect by hand or by command.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProspect {
    pub name: String,
    #[serde(default)]
    pub handle: Option<String>,
    pub platform: Platform,
    pub stage: FunnelStage,
    #[serde(default)]
    pub next_follow_up: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub is_hot_lead: bool,
}

impl NewProspect {
    pub fn named(name: &str, platform: Platform) -> Self {
        Self {
            name: name.to_string(),
            handle: None,
            platform,
            stage: FunnelStage::New,
            next_follow_up: None,
            notes: None,
            is_hot_lead: false,
        }
    }
}

/// Editable identity fields. Stage, follow-up, and flags have their own operations.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProspectDetails {
    pub name: String,
    #[serde(default)]
    pub handle: Option<String>,
    pub platform: Platform,
    #[serde(default)]
    pub notes: Option<String>,
}

fn required_name(name: &str) -> Result<String, FlowError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(FlowError::Validation("Name is required".to_string()));
    }
    Ok(trimmed.to_string())
}

fn optional_text(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Load a prospect or fail with `NotFound`.
pub fn load_prospect(db: &FlowDb, id: &str) -> Result<DbProspect, FlowError> {
    db.get_prospect(id)?
        .ok_or_else(|| FlowError::NotFound(format!("prospect {id}")))
}

fn save(db: &FlowDb, prospect: &DbProspect) -> Result<(), FlowError> {
    if db.update_prospect(prospect)? {
        Ok(())
    } else {
        Err(FlowError::NotFound(format!("prospect {}", prospect.id)))
    }
}

/// Create a prospect, enforcing the free-plan limit.
pub fn add_prospect(
    db: &FlowDb,
    new: NewProspect,
    is_pro: bool,
    now: DateTime<Utc>,
) -> Result<DbProspect, FlowError> {
    let name = required_name(&new.name)?;
    db.with_transaction(|tx| {
        if !can_add_prospect(tx.count_prospects()?, is_pro) {
            log::info!("Prospect limit reached, refusing to add '{}'", name);
            return Err(FlowError::EntitlementDenied(Feature::AddProspect));
        }
        let mut prospect = DbProspect::new(&name, new.platform, new.stage, now);
        prospect.handle = optional_text(new.handle);
        prospect.notes = optional_text(new.notes);
        prospect.next_follow_up = new.next_follow_up.map(stored_instant);
        prospect.is_hot_lead = new.is_hot_lead;
        tx.insert_prospect(&prospect)?;
        Ok(prospect)
    })
}

pub fn update_details(
    db: &FlowDb,
    id: &str,
    details: ProspectDetails,
    now: DateTime<Utc>,
) -> Result<DbProspect, FlowError> {
    let name = required_name(&details.name)?;
    db.with_transaction(|tx| {
        let mut prospect = load_prospect(tx, id)?;
        prospect.name = name;
        prospect.handle = optional_text(details.handle);
        prospect.platform = details.platform;
        prospect.notes = optional_text(details.notes);
        prospect.touch(now);
        save(tx, &prospect)?;
        Ok(prospect)
    })
}

/// Move a prospect to any stage, logging a stage-change activity.
/// Setting the current stage again changes nothing.
pub fn set_stage(
    db: &FlowDb,
    id: &str,
    stage: FunnelStage,
    now: DateTime<Utc>,
) -> Result<DbProspect, FlowError> {
    db.with_transaction(|tx| {
        let mut prospect = load_prospect(tx, id)?;
        if prospect.stage == stage {
            return Ok(prospect);
        }

        let mut activity = DbActivity::new(id, ActivityType::StageChange, now);
        activity.metadata = Some(BTreeMap::from([
            (
                "fromStage".to_string(),
                prospect.stage.display_name().to_string(),
            ),
            ("toStage".to_string(), stage.display_name().to_string()),
        ]));

        prospect.stage = stage;
        prospect.touch(now);
        save(tx, &prospect)?;
        tx.insert_activity(&activity)?;
        Ok(prospect)
    })
}

/// One step forward along the funnel. At the end of the funnel, or for DND,
/// the prospect is returned unchanged.
pub fn advance_stage(db: &FlowDb, id: &str, now: DateTime<Utc>) -> Result<DbProspect, FlowError> {
    let prospect = load_prospect(db, id)?;
    match next_stage(prospect.stage) {
        Some(stage) => set_stage(db, id, stage, now),
        None => Ok(prospect),
    }
}

pub fn retreat_stage(db: &FlowDb, id: &str, now: DateTime<Utc>) -> Result<DbProspect, FlowError> {
    let prospect = load_prospect(db, id)?;
    match previous_stage(prospect.stage) {
        Some(stage) => set_stage(db, id, stage, now),
        None => Ok(prospect),
    }
}

/// Refresh last-contact without logging. Used inside callers' transactions.
pub(crate) fn touch_contact(
    db: &FlowDb,
    id: &str,
    now: DateTime<Utc>,
) -> Result<DbProspect, FlowError> {
    let mut prospect = load_prospect(db, id)?;
    prospect.last_contact = stored_instant(now);
    prospect.touch(now);
    save(db, &prospect)?;
    Ok(prospect)
}

/// Mark contacted now and log a `contacted` activity.
pub fn mark_contacted(db: &FlowDb, id: &str, now: DateTime<Utc>) -> Result<DbProspect, FlowError> {
    db.with_transaction(|tx| {
        let prospect = touch_contact(tx, id, now)?;
        tx.insert_activity(&DbActivity::new(id, ActivityType::Contacted, now))?;
        Ok(prospect)
    })
}

pub fn toggle_hot_lead(db: &FlowDb, id: &str, now: DateTime<Utc>) -> Result<DbProspect, FlowError> {
    db.with_transaction(|tx| {
        let mut prospect = load_prospect(tx, id)?;
        prospect.is_hot_lead = !prospect.is_hot_lead;
        prospect.touch(now);
        save(tx, &prospect)?;
        Ok(prospect)
    })
}

pub fn set_follow_up(
    db: &FlowDb,
    id: &str,
    date: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<DbProspect, FlowError> {
    db.with_transaction(|tx| {
        let mut prospect = load_prospect(tx, id)?;
        prospect.next_follow_up = date.map(stored_instant);
        prospect.touch(now);
        save(tx, &prospect)?;
        Ok(prospect)
    })
}

pub fn clear_follow_up(db: &FlowDb, id: &str, now: DateTime<Utc>) -> Result<DbProspect, FlowError> {
    set_follow_up(db, id, None, now)
}

/// Push the follow-up `days` later, counting from the current follow-up or,
/// when none is set, from now.
pub fn snooze_follow_up(
    db: &FlowDb,
    id: &str,
    days: u32,
    now: DateTime<Utc>,
) -> Result<DbProspect, FlowError> {
    if days == 0 {
        return Err(FlowError::Validation(
            "Snooze must be at least one day".to_string(),
        ));
    }
    db.with_transaction(|tx| {
        let mut prospect = load_prospect(tx, id)?;
        let base = prospect.next_follow_up.unwrap_or(now);
        prospect.next_follow_up = Some(stored_instant(base + Duration::days(i64::from(days))));
        prospect.touch(now);
        save(tx, &prospect)?;
        Ok(prospect)
    })
}

/// Remove one prospect. Its activity history is left in the log.
pub fn delete_prospect(db: &FlowDb, id: &str) -> Result<(), FlowError> {
    if db.delete_prospect(id)? {
        log::info!("Deleted prospect {}", id);
        Ok(())
    } else {
        Err(FlowError::NotFound(format!("prospect {id}")))
    }
}

/// Wipe prospects, templates, and activities atomically.
pub fn delete_all_data(db: &FlowDb) -> Result<WipeSummary, FlowError> {
    let summary = db.delete_all_data()?;
    log::info!(
        "Deleted all data: {} prospects, {} templates, {} activities",
        summary.prospects,
        summary.templates,
        summary.activities
    );
    Ok(summary)
}

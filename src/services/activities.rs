// Activity log service
// Appends user-logged interactions. Communication activities also refresh
// the prospect's last contact inside the same transaction.

use chrono::{DateTime, Utc};

use crate::db::{DbActivity, FlowDb};
use crate::error::FlowError;
use crate::services::prospects::{load_prospect, touch_contact};
use crate::types::ActivityType;

pub fn log_activity(
    db: &FlowDb,
    prospect_id: &str,
    activity_type: ActivityType,
    notes: Option<String>,
    now: DateTime<Utc>,
) -> Result<DbActivity, FlowError> {
    if !activity_type.is_loggable() {
        return Err(FlowError::Validation(format!(
            "'{}' activities are recorded automatically",
            activity_type.as_str()
        )));
    }

    db.with_transaction(|tx| {
        match load_prospect(tx, prospect_id) {
            Ok(_) => {}
            Err(FlowError::NotFound(_)) => {
                return Err(FlowError::Validation(format!(
                    "Unknown prospect '{prospect_id}'"
                )))
            }
            Err(e) => return Err(e),
        }

        let mut activity = DbActivity::new(prospect_id, activity_type, now);
        activity.notes = notes
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        tx.insert_activity(&activity)?;

        if activity_type.counts_as_contact() {
            touch_contact(tx, prospect_id, now)?;
        }
        Ok(activity)
    })
}

/// History for one prospect, newest first.
pub fn history(db: &FlowDb, prospect_id: &str) -> Result<Vec<DbActivity>, FlowError> {
    Ok(db.activities_for_prospect(prospect_id)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::{at, test_db};
    use crate::services::prospects::{add_prospect, NewProspect};
    use crate::types::Platform;

    #[test]
    fn test_call_marks_contacted() {
        let db = test_db();
        let p = add_prospect(
            &db,
            NewProspect::named("Jane", Platform::Sms),
            false,
            at("2025-03-01T10:00:00.000Z"),
        )
        .unwrap();
        let later = at("2025-03-05T10:00:00.000Z");
        log_activity(&db, &p.id, ActivityType::Call, Some(" 20 min ".into()), later).unwrap();

        let reloaded = db.get_prospect(&p.id).unwrap().unwrap();
        assert_eq!(reloaded.last_contact, later);
        let log = history(&db, &p.id).unwrap();
        assert_eq!(log[0].notes.as_deref(), Some("20 min"));
    }

    #[test]
    fn test_note_leaves_last_contact() {
        let db = test_db();
        let created = at("2025-03-01T10:00:00.000Z");
        let p = add_prospect(&db, NewProspect::named("Jane", Platform::Sms), false, created)
            .unwrap();
        log_activity(
            &db,
            &p.id,
            ActivityType::Note,
            None,
            at("2025-03-05T10:00:00.000Z"),
        )
        .unwrap();
        assert_eq!(db.get_prospect(&p.id).unwrap().unwrap().last_contact, created);
    }

    #[test]
    fn test_unknown_prospect_and_system_types_rejected() {
        let db = test_db();
        let now = at("2025-03-05T10:00:00.000Z");
        assert!(matches!(
            log_activity(&db, "ghost", ActivityType::Note, None, now),
            Err(FlowError::Validation(_))
        ));
        assert!(matches!(
            log_activity(&db, "ghost", ActivityType::StageChange, None, now),
            Err(FlowError::Validation(_))
        ));
        assert_eq!(db.count_activities().unwrap(), 0);
    }
}

use std::collections::BTreeMap;

use rusqlite::params;

use super::*;
use crate::types::ActivityType;

impl FlowDb {
    // =========================================================================
    // Activities (append-only)
    // =========================================================================

    pub fn insert_activity(&self, activity: &DbActivity) -> Result<(), DbError> {
        let metadata = match &activity.metadata {
            Some(map) => Some(
                serde_json::to_string(map).map_err(|e| DbError::Corrupt(e.to_string()))?,
            ),
            None => None,
        };
        self.conn.execute(
            "INSERT INTO activities (id, prospect_id, activity_type, timestamp, notes, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                activity.id,
                activity.prospect_id,
                activity.activity_type.as_str(),
                ts(&activity.timestamp),
                activity.notes,
                metadata,
            ],
        )?;
        Ok(())
    }

    /// Activity history for one prospect, newest first.
    pub fn activities_for_prospect(&self, prospect_id: &str) -> Result<Vec<DbActivity>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, prospect_id, activity_type, timestamp, notes, metadata
             FROM activities
             WHERE prospect_id = ?1
             ORDER BY timestamp DESC, id ASC",
        )?;
        let rows = stmt.query_map(params![prospect_id], Self::map_activity_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn count_activities(&self) -> Result<usize, DbError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM activities", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn map_activity_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbActivity> {
        let activity_type: String = row.get(2)?;
        let timestamp: String = row.get(3)?;
        let metadata: Option<String> = row.get(5)?;
        let metadata = match metadata {
            Some(raw) => Some(
                serde_json::from_str::<BTreeMap<String, String>>(&raw).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        5,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })?,
            ),
            None => None,
        };
        Ok(DbActivity {
            id: row.get(0)?,
            prospect_id: row.get(1)?,
            activity_type: ActivityType::parse(&activity_type)
                .ok_or_else(|| bad_enum(2, &activity_type))?,
            timestamp: parse_ts(3, &timestamp)?,
            notes: row.get(4)?,
            metadata,
        })
    }
}

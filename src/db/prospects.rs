use rusqlite::{params, OptionalExtension, ToSql};

use super::*;
use crate::types::{FunnelStage, Platform};

const PROSPECT_COLUMNS: &str = "id, name, handle, platform, stage, last_contact, next_follow_up,
     notes, is_hot_lead, created_at, updated_at, last_template_id, import_key";

impl FlowDb {
    // =========================================================================
    // Prospects
    // =========================================================================

    /// Insert a new prospect. The caller owns id generation; a duplicate id fails.
    pub fn insert_prospect(&self, prospect: &DbProspect) -> Result<(), DbError> {
        self.conn.execute(
            &format!(
                "INSERT INTO prospects ({PROSPECT_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
            ),
            params![
                prospect.id,
                prospect.name.trim(),
                prospect.handle,
                prospect.platform.as_str(),
                prospect.stage.as_str(),
                ts(&prospect.last_contact),
                prospect.next_follow_up.as_ref().map(ts),
                prospect.notes,
                prospect.is_hot_lead as i32,
                ts(&prospect.created_at),
                ts(&prospect.updated_at),
                prospect.last_template_id,
                prospect.import_key,
            ],
        )?;
        Ok(())
    }

    /// Insert a prospect carried in from the shared inbox.
    ///
    /// Returns false when a prospect with the same `import_key` already exists,
    /// which is how a re-drain after an interrupted clear stays duplicate-free.
    pub fn insert_imported_prospect(&self, prospect: &DbProspect) -> Result<bool, DbError> {
        let changed = self.conn.execute(
            &format!(
                "INSERT INTO prospects ({PROSPECT_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                 ON CONFLICT(import_key) DO NOTHING"
            ),
            params![
                prospect.id,
                prospect.name.trim(),
                prospect.handle,
                prospect.platform.as_str(),
                prospect.stage.as_str(),
                ts(&prospect.last_contact),
                prospect.next_follow_up.as_ref().map(ts),
                prospect.notes,
                prospect.is_hot_lead as i32,
                ts(&prospect.created_at),
                ts(&prospect.updated_at),
                prospect.last_template_id,
                prospect.import_key,
            ],
        )?;
        Ok(changed == 1)
    }

    /// Overwrite every mutable column of an existing prospect.
    /// Returns false when no row has this id.
    pub fn update_prospect(&self, prospect: &DbProspect) -> Result<bool, DbError> {
        let changed = self.conn.execute(
            "UPDATE prospects SET
                name = ?2,
                handle = ?3,
                platform = ?4,
                stage = ?5,
                last_contact = ?6,
                next_follow_up = ?7,
                notes = ?8,
                is_hot_lead = ?9,
                updated_at = ?10,
                last_template_id = ?11
             WHERE id = ?1",
            params![
                prospect.id,
                prospect.name.trim(),
                prospect.handle,
                prospect.platform.as_str(),
                prospect.stage.as_str(),
                ts(&prospect.last_contact),
                prospect.next_follow_up.as_ref().map(ts),
                prospect.notes,
                prospect.is_hot_lead as i32,
                ts(&prospect.updated_at),
                prospect.last_template_id,
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn get_prospect(&self, id: &str) -> Result<Option<DbProspect>, DbError> {
        let prospect = self
            .conn
            .query_row(
                &format!("SELECT {PROSPECT_COLUMNS} FROM prospects WHERE id = ?1"),
                params![id],
                Self::map_prospect_row,
            )
            .optional()?;
        Ok(prospect)
    }

    pub fn import_key_exists(&self, import_key: &str) -> Result<bool, DbError> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM prospects WHERE import_key = ?1)",
            params![import_key],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Query prospects by predicate and sort order.
    ///
    /// Stage, platform, and hot-lead filters run in SQL. The free-text filter
    /// runs afterwards in Rust because SQLite's `LOWER` only folds ASCII.
    pub fn query_prospects(&self, query: &ProspectQuery) -> Result<Vec<DbProspect>, DbError> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut values: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(stage) = query.stage {
            clauses.push("stage = ?");
            values.push(Box::new(stage.as_str()));
        }
        if let Some(platform) = query.platform {
            clauses.push("platform = ?");
            values.push(Box::new(platform.as_str()));
        }
        if let Some(hot) = query.hot_lead {
            clauses.push("is_hot_lead = ?");
            values.push(Box::new(hot as i32));
        }

        let where_sql = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };
        let order_sql = match query.sort {
            ProspectSort::NameAsc => "name COLLATE NOCASE ASC, id ASC",
            ProspectSort::LastContactDesc => "last_contact DESC, id ASC",
            ProspectSort::NextFollowUpAsc => {
                "CASE WHEN next_follow_up IS NULL THEN 1 ELSE 0 END, next_follow_up ASC, id ASC"
            }
            ProspectSort::CreatedDesc => "created_at DESC, id ASC",
            ProspectSort::UpdatedDesc => "updated_at DESC, id ASC",
        };

        let sql = format!("SELECT {PROSPECT_COLUMNS} FROM prospects {where_sql} ORDER BY {order_sql}");
        let mut stmt = self.conn.prepare(&sql)?;
        let param_refs: Vec<&dyn ToSql> = values.iter().map(|v| v.as_ref()).collect();
        let rows = stmt.query_map(param_refs.as_slice(), Self::map_prospect_row)?;

        let needle = query
            .search
            .as_deref()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty());

        let mut prospects = Vec::new();
        for row in rows {
            let prospect = row?;
            if let Some(ref needle) = needle {
                if !matches_search(&prospect, needle) {
                    continue;
                }
            }
            prospects.push(prospect);
        }
        Ok(prospects)
    }

    pub fn all_prospects(&self) -> Result<Vec<DbProspect>, DbError> {
        self.query_prospects(&ProspectQuery::all())
    }

    pub fn count_prospects(&self) -> Result<usize, DbError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM prospects", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Delete one prospect. Its activities stay in the append-only log.
    pub fn delete_prospect(&self, id: &str) -> Result<bool, DbError> {
        let changed = self
            .conn
            .execute("DELETE FROM prospects WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    /// Remove every prospect, template, and activity in one transaction.
    pub fn delete_all_data(&self) -> Result<WipeSummary, DbError> {
        self.with_transaction(|db| {
            let activities = db.conn.execute("DELETE FROM activities", [])?;
            let templates = db.conn.execute("DELETE FROM message_templates", [])?;
            let prospects = db.conn.execute("DELETE FROM prospects", [])?;
            Ok(WipeSummary {
                prospects,
                templates,
                activities,
            })
        })
    }

    pub(crate) fn map_prospect_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbProspect> {
        let platform: String = row.get(3)?;
        let stage: String = row.get(4)?;
        let last_contact: String = row.get(5)?;
        let created_at: String = row.get(9)?;
        let updated_at: String = row.get(10)?;
        Ok(DbProspect {
            id: row.get(0)?,
            name: row.get(1)?,
            handle: row.get(2)?,
            platform: Platform::parse(&platform).unwrap_or(Platform::Other),
            stage: FunnelStage::parse(&stage).unwrap_or(FunnelStage::New),
            last_contact: parse_ts(5, &last_contact)?,
            next_follow_up: parse_opt_ts(6, row.get(6)?)?,
            notes: row.get(7)?,
            is_hot_lead: row.get::<_, i32>(8)? != 0,
            created_at: parse_ts(9, &created_at)?,
            updated_at: parse_ts(10, &updated_at)?,
            last_template_id: row.get(11)?,
            import_key: row.get(12)?,
        })
    }
}

fn matches_search(prospect: &DbProspect, needle: &str) -> bool {
    let hit = |field: Option<&str>| {
        field
            .map(|value| value.to_lowercase().contains(needle))
            .unwrap_or(false)
    };
    hit(Some(&prospect.name)) || hit(prospect.handle.as_deref()) || hit(prospect.notes.as_deref())
}

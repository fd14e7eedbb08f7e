use rusqlite::{params, OptionalExtension};

use super::*;
use crate::types::TemplateCategory;

const TEMPLATE_COLUMNS: &str = "id, name, category, content, is_built_in, created_at, updated_at,
     times_sent, times_converted, variant_group, variant_letter";

impl FlowDb {
    // =========================================================================
    // Message templates
    // =========================================================================

    pub fn insert_template(&self, template: &DbTemplate) -> Result<(), DbError> {
        self.conn.execute(
            &format!(
                "INSERT INTO message_templates ({TEMPLATE_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            params![
                template.id,
                template.name,
                template.category.as_str(),
                template.content,
                template.is_built_in as i32,
                ts(&template.created_at),
                ts(&template.updated_at),
                template.times_sent,
                template.times_converted,
                template.variant_group,
                template.variant_letter,
            ],
        )?;
        Ok(())
    }

    /// Update name, category, body and variant membership. Counters are only
    /// changed through [`FlowDb::increment_template_sent`] and
    /// [`FlowDb::increment_template_converted`].
    pub fn update_template(&self, template: &DbTemplate) -> Result<bool, DbError> {
        let changed = self.conn.execute(
            "UPDATE message_templates SET
                name = ?2,
                category = ?3,
                content = ?4,
                updated_at = ?5,
                variant_group = ?6,
                variant_letter = ?7
             WHERE id = ?1",
            params![
                template.id,
                template.name,
                template.category.as_str(),
                template.content,
                ts(&template.updated_at),
                template.variant_group,
                template.variant_letter,
            ],
        )?;
        Ok(changed > 0)
    }

    pub fn get_template(&self, id: &str) -> Result<Option<DbTemplate>, DbError> {
        let template = self
            .conn
            .query_row(
                &format!("SELECT {TEMPLATE_COLUMNS} FROM message_templates WHERE id = ?1"),
                params![id],
                Self::map_template_row,
            )
            .optional()?;
        Ok(template)
    }

    /// Templates ordered by category, then name. `None` lists every category.
    pub fn list_templates(
        &self,
        category: Option<TemplateCategory>,
    ) -> Result<Vec<DbTemplate>, DbError> {
        let mut templates = match category {
            Some(category) => {
                let mut stmt = self.conn.prepare(&format!(
                    "SELECT {TEMPLATE_COLUMNS} FROM message_templates WHERE category = ?1"
                ))?;
                let rows = stmt.query_map(params![category.as_str()], Self::map_template_row)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
            None => {
                let mut stmt = self
                    .conn
                    .prepare(&format!("SELECT {TEMPLATE_COLUMNS} FROM message_templates"))?;
                let rows = stmt.query_map([], Self::map_template_row)?;
                rows.collect::<Result<Vec<_>, _>>()?
            }
        };
        templates.sort_by(|a, b| {
            a.category
                .order()
                .cmp(&b.category.order())
                .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
                .then_with(|| a.variant_letter.cmp(&b.variant_letter))
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(templates)
    }

    /// Members of one A/B group, ordered by letter.
    pub fn templates_in_group(&self, group: &str) -> Result<Vec<DbTemplate>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM message_templates
             WHERE variant_group = ?1 ORDER BY variant_letter ASC"
        ))?;
        let rows = stmt.query_map(params![group], Self::map_template_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn count_templates(&self) -> Result<usize, DbError> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM message_templates", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Count of user-authored templates, the quantity the free plan limits.
    pub fn count_custom_templates(&self) -> Result<usize, DbError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM message_templates WHERE is_built_in = 0",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn count_built_in_templates(&self) -> Result<usize, DbError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM message_templates WHERE is_built_in = 1",
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Delete a user template. Built-ins are never removed; returns false for them.
    pub fn delete_template(&self, id: &str) -> Result<bool, DbError> {
        let changed = self.conn.execute(
            "DELETE FROM message_templates WHERE id = ?1 AND is_built_in = 0",
            params![id],
        )?;
        Ok(changed > 0)
    }

    pub fn increment_template_sent(
        &self,
        id: &str,
        now: &chrono::DateTime<chrono::Utc>,
    ) -> Result<bool, DbError> {
        let changed = self.conn.execute(
            "UPDATE message_templates SET times_sent = times_sent + 1, updated_at = ?2
             WHERE id = ?1",
            params![id, ts(now)],
        )?;
        Ok(changed > 0)
    }

    /// Count a conversion, saturating at `times_sent`.
    pub fn increment_template_converted(
        &self,
        id: &str,
        now: &chrono::DateTime<chrono::Utc>,
    ) -> Result<bool, DbError> {
        let changed = self.conn.execute(
            "UPDATE message_templates
             SET times_converted = MIN(times_converted + 1, times_sent), updated_at = ?2
             WHERE id = ?1",
            params![id, ts(now)],
        )?;
        Ok(changed > 0)
    }

    fn map_template_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DbTemplate> {
        let category: String = row.get(2)?;
        let created_at: String = row.get(5)?;
        let updated_at: String = row.get(6)?;
        Ok(DbTemplate {
            id: row.get(0)?,
            name: row.get(1)?,
            category: TemplateCategory::parse(&category).ok_or_else(|| bad_enum(2, &category))?,
            content: row.get(3)?,
            is_built_in: row.get::<_, i32>(4)? != 0,
            created_at: parse_ts(5, &created_at)?,
            updated_at: parse_ts(6, &updated_at)?,
            times_sent: row.get(7)?,
            times_converted: row.get(8)?,
            variant_group: row.get(9)?,
            variant_letter: row.get(10)?,
        })
    }
}

//! Shared type definitions for the database layer.

use std::collections::BTreeMap;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ActivityType, FunnelStage, Platform, TemplateCategory};

/// `dt` at the precision the store keeps (milliseconds).
///
/// Every timestamp a row carries passes through here, so a row held in memory
/// compares equal to the same row read back.
pub fn stored_instant(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.trunc_subsecs(3)
}

/// Errors specific to database operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),

    #[error("Schema migration failed: {0}")]
    Migration(#[from] crate::migrations::MigrationError),

    #[error("Stored row is unreadable: {0}")]
    Corrupt(String),
}

/// A row from the `prospects` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbProspect {
    pub id: String,
    pub name: String,
    pub handle: Option<String>,
    pub platform: Platform,
    pub stage: FunnelStage,
    pub last_contact: DateTime<Utc>,
    pub next_follow_up: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    pub is_hot_lead: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Template most recently sent to this prospect.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_template_id: Option<String>,
    /// Capture id of the shared-inbox entry this prospect was imported from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub import_key: Option<String>,
}

impl DbProspect {
    /// A fresh prospect with a generated id; every timestamp is `now`.
    pub fn new(name: &str, platform: Platform, stage: FunnelStage, now: DateTime<Utc>) -> Self {
        let now = stored_instant(now);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            handle: None,
            platform,
            stage,
            last_contact: now,
            next_follow_up: None,
            notes: None,
            is_hot_lead: false,
            created_at: now,
            updated_at: now,
            last_template_id: None,
            import_key: None,
        }
    }

    /// Bump `updated_at`, never moving it behind `created_at`.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = stored_instant(now).max(self.created_at);
    }
}

/// A row from the `message_templates` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbTemplate {
    pub id: String,
    pub name: String,
    pub category: TemplateCategory,
    pub content: String,
    pub is_built_in: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub times_sent: u32,
    pub times_converted: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant_group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant_letter: Option<String>,
}

impl DbTemplate {
    pub fn new(
        name: &str,
        category: TemplateCategory,
        content: &str,
        is_built_in: bool,
        now: DateTime<Utc>,
    ) -> Self {
        let now = stored_instant(now);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.trim().to_string(),
            category,
            content: content.trim().to_string(),
            is_built_in,
            created_at: now,
            updated_at: now,
            times_sent: 0,
            times_converted: 0,
            variant_group: None,
            variant_letter: None,
        }
    }

    /// Conversion rate as a percentage in `[0, 100]`; 0 when nothing was sent.
    pub fn conversion_rate(&self) -> f64 {
        if self.times_sent == 0 {
            return 0.0;
        }
        let converted = self.times_converted.min(self.times_sent);
        f64::from(converted) / f64::from(self.times_sent) * 100.0
    }

    pub fn is_variant(&self) -> bool {
        self.variant_group.is_some()
    }

    pub fn display_name(&self) -> String {
        match &self.variant_letter {
            Some(letter) => format!("{} ({})", self.name, letter),
            None => self.name.clone(),
        }
    }

    /// First 50 characters of the body, ellipsized.
    pub fn preview(&self) -> String {
        if self.content.chars().count() <= 50 {
            return self.content.clone();
        }
        let head: String = self.content.chars().take(50).collect();
        format!("{head}...")
    }
}

/// A row from the append-only `activities` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbActivity {
    pub id: String,
    pub prospect_id: String,
    pub activity_type: ActivityType,
    pub timestamp: DateTime<Utc>,
    pub notes: Option<String>,
    /// Small label map, e.g. `fromStage` / `toStage` for stage changes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BTreeMap<String, String>>,
}

impl DbActivity {
    pub fn new(prospect_id: &str, activity_type: ActivityType, now: DateTime<Utc>) -> Self {
        let now = stored_instant(now);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            prospect_id: prospect_id.to_string(),
            activity_type,
            timestamp: now,
            notes: None,
            metadata: None,
        }
    }
}

/// Sort orders supported by `FlowDb::query_prospects`. Ties always break by id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProspectSort {
    #[default]
    NameAsc,
    LastContactDesc,
    NextFollowUpAsc,
    CreatedDesc,
    UpdatedDesc,
}

/// Predicate for prospect queries. `None` fields do not filter.
#[derive(Debug, Clone, Default)]
pub struct ProspectQuery {
    pub stage: Option<FunnelStage>,
    pub platform: Option<Platform>,
    pub hot_lead: Option<bool>,
    /// Case-insensitive substring over name, handle, and notes.
    pub search: Option<String>,
    pub sort: ProspectSort,
}

impl ProspectQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn search(text: &str) -> Self {
        Self {
            search: Some(text.to_string()),
            ..Self::default()
        }
    }
}

/// Row counts removed by a full data wipe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WipeSummary {
    pub prospects: usize,
    pub templates: usize,
    pub activities: usize,
}

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::bridge::SharedContainer;
use crate::calendar::{CalendarAction, CalendarProvider, CalendarSync};
use crate::db::{DbProspect, FlowDb, WipeSummary};
use crate::entitlement::{BillingStatus, Entitlements};
use crate::error::FlowError;
use crate::importer::{drain, DrainReport};
use crate::notification::{refresh_reminders, sync_follow_up_reminder, Notifier, ReminderRefresh};
use crate::pipeline::Clock;
use crate::services::prospects::{self, NewProspect};
use crate::services::templates::seed_built_in_templates;
use crate::shortcuts;
use crate::sync_status::{RemoteSync, SyncStatus, SyncStatusProjector};
use crate::types::{Config, Platform};
use crate::util::atomic_write_str;
use crate::widget;

const CONFIG_FILE: &str = "config.json";
const SHARED_CONTAINER_DIR: &str = "group";

/// External services the app talks to. Notifications and calendar are optional.
pub struct Collaborators {
    pub billing: Arc<dyn BillingStatus>,
    pub remote: Arc<dyn RemoteSync>,
    pub notifier: Option<Arc<dyn Notifier>>,
    pub calendar: Option<Arc<dyn CalendarProvider>>,
}

/// What one foreground pass did.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ForegroundReport {
    pub imported: usize,
    pub dropped: usize,
    pub duplicates: usize,
    pub deferred: usize,
    pub prospect_count: usize,
    pub badge: usize,
}

/// Application state: explicitly constructed, owned by the host, passed by reference.
pub struct AppState {
    pub data_dir: PathBuf,
    pub config: Mutex<Config>,
    pub db: Mutex<FlowDb>,
    /// True when the file store could not open and records live only in memory.
    pub in_memory_store: bool,
    pub container: SharedContainer,
    pub entitlements: Entitlements,
    pub sync: SyncStatusProjector,
    notifier: Option<Arc<dyn Notifier>>,
    calendar: Option<CalendarSync>,
}

impl AppState {
    pub fn open(
        data_dir: &Path,
        collaborators: Collaborators,
        now: DateTime<Utc>,
    ) -> Result<Self, FlowError> {
        let config = load_config(data_dir);
        let (db, in_memory_store) = open_store(data_dir)?;

        match seed_built_in_templates(&db, now) {
            Ok(0) => {}
            Ok(n) => log::info!("Seeded {} built-in templates", n),
            Err(e) => log::warn!("Failed to seed built-in templates: {}", e),
        }

        let container_dir = config
            .app_group_dir
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join(SHARED_CONTAINER_DIR));

        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            config: Mutex::new(config),
            db: Mutex::new(db),
            in_memory_store,
            container: SharedContainer::new(container_dir),
            entitlements: Entitlements::new(collaborators.billing),
            sync: SyncStatusProjector::new(collaborators.remote, Some(data_dir)),
            notifier: collaborators.notifier,
            calendar: collaborators.calendar.map(CalendarSync::new),
        })
    }

    pub fn clock(&self, now: DateTime<Utc>) -> Clock {
        Clock::new(now, self.config.lock().tz())
    }

    /// Run `f` against the store. The lock is held only for the call.
    pub fn with_db<T>(&self, f: impl FnOnce(&FlowDb) -> Result<T, FlowError>) -> Result<T, FlowError> {
        let db = self.db.lock();
        f(&db)
    }

    /// Launch: resolve the sync account, then do the foreground pass.
    pub async fn launch(&self, now: DateTime<Utc>) -> Result<ForegroundReport, FlowError> {
        let account = self.sync.check_account_status().await;
        log::info!("Sync account status at launch: {:?}", account);
        self.on_foreground(now).await
    }

    /// Import staged captures, then refresh every derived surface: the
    /// entitlement snapshot, the widget digest, and reminders. Only a store
    /// failure during import is returned; the refresh steps log and continue.
    pub async fn on_foreground(&self, now: DateTime<Utc>) -> Result<ForegroundReport, FlowError> {
        let is_pro = self.entitlements.is_pro();
        let clock = self.clock(now);

        let (report, prospects) = self.with_db(|db| {
            let report = drain(db, &self.container, is_pro, now)?;
            Ok((report, db.all_prospects()?))
        })?;
        let DrainReport {
            imported,
            dropped,
            duplicates,
            deferred,
        } = report;

        self.mirror_snapshot(prospects.len(), now);
        if let Err(e) = widget::publish(&self.container, &prospects, &clock) {
            log::warn!("Failed to publish widget data: {}", e);
        }
        let reminders = self.refresh_reminders(&prospects, &clock).await;

        Ok(ForegroundReport {
            imported,
            dropped,
            duplicates,
            deferred,
            prospect_count: prospects.len(),
            badge: reminders.badge,
        })
    }

    async fn refresh_reminders(&self, prospects: &[DbProspect], clock: &Clock) -> ReminderRefresh {
        let Some(notifier) = self.notifier.as_deref() else {
            return ReminderRefresh::default();
        };
        let config = self.config.lock().clone();
        refresh_reminders(notifier, prospects, clock, &config).await
    }

    /// Re-plan the reminder and calendar event for one prospect after an edit.
    pub async fn after_prospect_change(&self, prospect: &DbProspect, now: DateTime<Utc>) -> CalendarAction {
        let clock = self.clock(now);
        let config = self.config.lock().clone();
        if let Some(notifier) = self.notifier.as_deref() {
            sync_follow_up_reminder(notifier, prospect, &clock, &config).await;
        }
        match &self.calendar {
            Some(calendar) => {
                calendar
                    .sync_follow_up(prospect, &clock, config.calendar_sync_enabled)
                    .await
            }
            None => CalendarAction::Skipped,
        }
    }

    /// Clean up external traces of a deleted prospect.
    pub async fn after_prospect_deleted(&self, prospect_id: &str) {
        if let Some(notifier) = self.notifier.as_deref() {
            let id = crate::notification::follow_up_reminder_id(prospect_id);
            if let Err(e) = notifier.cancel(&id).await {
                log::warn!("Failed to cancel reminder for {}: {}", prospect_id, e);
            }
        }
        if let Some(calendar) = &self.calendar {
            calendar.remove(prospect_id).await;
        }
    }

    fn mirror_snapshot(&self, prospect_count: usize, now: DateTime<Utc>) {
        if let Err(e) = self.entitlements.mirror(&self.container, prospect_count, now) {
            log::warn!("Failed to mirror entitlement snapshot: {}", e);
        }
    }

    /// Add a prospect on the current plan. The capture process sees the new
    /// count right away.
    pub fn add_prospect(&self, new: NewProspect, now: DateTime<Utc>) -> Result<DbProspect, FlowError> {
        let is_pro = self.entitlements.is_pro();
        let (prospect, count) = self.with_db(|db| {
            let prospect = prospects::add_prospect(db, new, is_pro, now)?;
            Ok((prospect, db.count_prospects()?))
        })?;
        self.mirror_snapshot(count, now);
        Ok(prospect)
    }

    /// Voice-command add. Returns the spoken confirmation.
    pub fn add_prospect_by_command(
        &self,
        name: &str,
        platform: Platform,
        handle: Option<String>,
        is_hot_lead: bool,
        now: DateTime<Utc>,
    ) -> Result<String, FlowError> {
        let is_pro = self.entitlements.is_pro();
        let (reply, count) = self.with_db(|db| {
            let reply =
                shortcuts::add_prospect_by_command(db, name, platform, handle, is_hot_lead, is_pro, now)?;
            Ok((reply, db.count_prospects()?))
        })?;
        self.mirror_snapshot(count, now);
        Ok(reply)
    }

    pub async fn delete_prospect(&self, id: &str, now: DateTime<Utc>) -> Result<(), FlowError> {
        let count = self.with_db(|db| {
            prospects::delete_prospect(db, id)?;
            Ok(db.count_prospects()?)
        })?;
        self.mirror_snapshot(count, now);
        self.after_prospect_deleted(id).await;
        Ok(())
    }

    pub fn delete_all_data(&self, now: DateTime<Utc>) -> Result<WipeSummary, FlowError> {
        let summary = self.with_db(prospects::delete_all_data)?;
        self.mirror_snapshot(0, now);
        Ok(summary)
    }

    pub async fn sync_now(&self, now: DateTime<Utc>) -> SyncStatus {
        self.sync.trigger_sync(now).await
    }

    /// Apply `mutator` to the in-memory config and persist it.
    pub fn create_or_update_config(&self, mutator: impl FnOnce(&mut Config)) -> Result<Config, String> {
        let mut guard = self.config.lock();
        let mut config = guard.clone();
        mutator(&mut config);
        save_config(&self.data_dir, &config)?;
        *guard = config.clone();
        Ok(config)
    }
}

/// File store first, in-memory store second. Failing both is fatal.
fn open_store(data_dir: &Path) -> Result<(FlowDb, bool), FlowError> {
    match FlowDb::open(data_dir) {
        Ok(db) => Ok((db, false)),
        Err(file_err) => {
            log::error!(
                "Failed to open store in {}: {}. Falling back to an in-memory store.",
                data_dir.display(),
                file_err
            );
            match FlowDb::open_in_memory() {
                Ok(db) => Ok((db, true)),
                Err(mem_err) => Err(FlowError::StoreUnavailable(format!(
                    "file store: {}; in-memory store: {}",
                    file_err, mem_err
                ))),
            }
        }
    }
}

pub fn config_path(data_dir: &Path) -> PathBuf {
    data_dir.join(CONFIG_FILE)
}

/// Load `<data_dir>/config.json`. A missing or unreadable file yields defaults.
pub fn load_config(data_dir: &Path) -> Config {
    let path = config_path(data_dir);
    if !path.exists() {
        return Config::default();
    }
    let content = match fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) => {
            log::warn!("Failed to read config at {}: {}", path.display(), e);
            return Config::default();
        }
    };
    match serde_json::from_str(&content) {
        Ok(config) => config,
        Err(e) => {
            log::warn!("Failed to parse config at {}: {}. Using defaults.", path.display(), e);
            Config::default()
        }
    }
}

pub fn save_config(data_dir: &Path, config: &Config) -> Result<(), String> {
    let content = serde_json::to_string_pretty(config)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;
    atomic_write_str(&config_path(data_dir), &content)
        .map_err(|e| format!("Failed to write config: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::PendingProspect;
    use crate::db::test_utils::at;
    use crate::entitlement::{StaticPlan, FREE_PROSPECT_LIMIT};
    use crate::sync_status::{AccountStatus, RemoteError};
    use async_trait::async_trait;

    struct NoAccountRemote;

    #[async_trait]
    impl RemoteSync for NoAccountRemote {
        async fn account_status(&self) -> Result<AccountStatus, RemoteError> {
            Ok(AccountStatus::NoAccount)
        }

        async fn subscribe_for_changes(&self) -> Result<(), RemoteError> {
            Ok(())
        }

        async fn sync(&self) -> Result<(), RemoteError> {
            Err(RemoteError::Interrupted("unexpected".into()))
        }
    }

    fn collaborators(is_pro: bool) -> Collaborators {
        Collaborators {
            billing: Arc::new(StaticPlan(is_pro)),
            remote: Arc::new(NoAccountRemote),
            notifier: None,
            calendar: None,
        }
    }

    fn data_dir() -> PathBuf {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_path_buf();
        std::mem::forget(dir);
        path
    }

    #[test]
    fn test_config_round_trip_and_defaults() {
        let dir = data_dir();
        assert_eq!(load_config(&dir).morning_reminder_hour, 9);

        let mut config = Config::default();
        config.timezone = Some("America/Chicago".into());
        config.notifications_enabled = true;
        save_config(&dir, &config).unwrap();
        let loaded = load_config(&dir);
        assert_eq!(loaded.timezone.as_deref(), Some("America/Chicago"));
        assert!(loaded.notifications_enabled);

        fs::write(config_path(&dir), "{ not json").unwrap();
        assert!(!load_config(&dir).notifications_enabled);
    }

    #[test]
    fn test_open_seeds_templates_once() {
        let dir = data_dir();
        let now = at("2025-03-10T15:00:00.000Z");
        let first = AppState::open(&dir, collaborators(false), now).unwrap();
        assert!(!first.in_memory_store);
        let count = first.with_db(|db| Ok(db.count_templates()?)).unwrap();
        assert_eq!(count, 7);
        drop(first);

        let second = AppState::open(&dir, collaborators(false), now).unwrap();
        assert_eq!(second.with_db(|db| Ok(db.count_templates()?)).unwrap(), 7);
    }

    #[test]
    fn test_unwritable_data_dir_falls_back_to_memory() {
        let dir = data_dir();
        let blocker = dir.join("not-a-dir");
        fs::write(&blocker, "file").unwrap();
        let state = AppState::open(&blocker, collaborators(false), at("2025-03-10T15:00:00.000Z")).unwrap();
        assert!(state.in_memory_store);
    }

    #[test]
    fn test_update_config_persists() {
        let dir = data_dir();
        let state = AppState::open(&dir, collaborators(false), at("2025-03-10T15:00:00.000Z")).unwrap();
        state
            .create_or_update_config(|c| c.morning_reminder_hour = 7)
            .unwrap();
        assert_eq!(load_config(&dir).morning_reminder_hour, 7);
        assert_eq!(state.config.lock().morning_reminder_hour, 7);
    }

    #[tokio::test]
    async fn test_foreground_imports_and_mirrors() {
        let dir = data_dir();
        let now = at("2025-03-10T15:00:00.000Z");
        let state = AppState::open(&dir, collaborators(false), now).unwrap();
        state
            .container
            .append_pending(PendingProspect {
                id: "cap-1".into(),
                name: "Jane".into(),
                handle: None,
                platform: "instagram".into(),
                stage: "new".into(),
                notes: None,
                is_hot_lead: false,
                created_at: Some(now),
            })
            .unwrap();

        let report = state.on_foreground(now).await.unwrap();
        assert_eq!(report.imported, 1);
        assert_eq!(report.prospect_count, 1);
        assert_eq!(state.container.pending_count(), 0);
        assert_eq!(
            state.container.entitlement_snapshot().unwrap().prospect_count,
            1
        );
    }

    #[tokio::test]
    async fn test_prospect_changes_refresh_capture_limit() {
        let dir = data_dir();
        let now = at("2025-03-10T15:00:00.000Z");
        let state = AppState::open(&dir, collaborators(false), now).unwrap();
        let snapshot_count = || state.container.entitlement_snapshot().unwrap().prospect_count;

        let first = state
            .add_prospect(NewProspect::named("P0", Platform::Instagram), now)
            .unwrap();
        assert_eq!(snapshot_count(), 1);
        for i in 1..FREE_PROSPECT_LIMIT - 1 {
            state
                .add_prospect(NewProspect::named(&format!("P{i}"), Platform::Instagram), now)
                .unwrap();
        }
        assert!(!crate::capture::limit_reached(&state.container));
        state
            .add_prospect_by_command("Sam", Platform::Sms, None, false, now)
            .unwrap();
        assert_eq!(snapshot_count(), FREE_PROSPECT_LIMIT);
        assert!(crate::capture::limit_reached(&state.container));

        state.delete_prospect(&first.id, now).await.unwrap();
        assert_eq!(snapshot_count(), FREE_PROSPECT_LIMIT - 1);
        assert!(!crate::capture::limit_reached(&state.container));

        state.delete_all_data(now).unwrap();
        assert_eq!(snapshot_count(), 0);
    }

    #[tokio::test]
    async fn test_launch_without_account_never_syncs() {
        let dir = data_dir();
        let now = at("2025-03-10T15:00:00.000Z");
        let state = AppState::open(&dir, collaborators(true), now).unwrap();
        state.launch(now).await.unwrap();
        assert_eq!(state.sync_now(now).await, SyncStatus::NotSignedIn);
    }
}

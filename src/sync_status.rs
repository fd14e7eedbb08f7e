//! Sync status projector.
//!
//! Record-level sync is delegated to a managed remote collaborator. This
//! module only asks it for account status, triggers a round trip, and folds
//! the answers into a small state machine the UI can display and retry from.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::FlowError;
use crate::util::atomic_write_str;

const SYNC_STATE_FILE: &str = "sync_state.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "message", rename_all = "camelCase")]
pub enum SyncStatus {
    Idle,
    Syncing,
    Synced,
    Error(String),
    Offline,
    NotSignedIn,
}

impl SyncStatus {
    pub fn label(&self) -> String {
        match self {
            SyncStatus::Idle => "Not synced yet".to_string(),
            SyncStatus::Syncing => "Syncing…".to_string(),
            SyncStatus::Synced => "Up to date".to_string(),
            SyncStatus::Error(message) => format!("Sync error: {message}"),
            SyncStatus::Offline => {
                "No internet connection. Your data will sync when you're back online.".to_string()
            }
            SyncStatus::NotSignedIn => "Please sign in to iCloud to sync your data.".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AccountStatus {
    Unknown,
    Available,
    NoAccount,
    Restricted,
    CouldNotDetermine,
    TemporarilyUnavailable,
}

#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    #[error("Remote service unavailable: {0}")]
    Unavailable(String),

    #[error("Sync interrupted: {0}")]
    Interrupted(String),
}

/// The managed record-sync service.
#[async_trait]
pub trait RemoteSync: Send + Sync {
    async fn account_status(&self) -> Result<AccountStatus, RemoteError>;

    /// Register for change pushes. Re-registering an existing subscription is not an error.
    async fn subscribe_for_changes(&self) -> Result<(), RemoteError>;

    /// One sync round trip.
    async fn sync(&self) -> Result<(), RemoteError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedSyncState {
    #[serde(default)]
    last_sync_at: Option<DateTime<Utc>>,
}

struct ProjectorState {
    status: SyncStatus,
    account: AccountStatus,
    last_sync: Option<DateTime<Utc>>,
}

pub struct SyncStatusProjector {
    remote: Arc<dyn RemoteSync>,
    state: Mutex<ProjectorState>,
    state_path: Option<PathBuf>,
}

impl SyncStatusProjector {
    /// Build a projector. With a `data_dir`, the last successful sync time is
    /// loaded from and persisted to `<data_dir>/sync_state.json`.
    pub fn new(remote: Arc<dyn RemoteSync>, data_dir: Option<&Path>) -> Self {
        let state_path = data_dir.map(|dir| dir.join(SYNC_STATE_FILE));
        let last_sync = state_path.as_deref().and_then(load_last_sync);
        Self {
            remote,
            state: Mutex::new(ProjectorState {
                status: SyncStatus::Idle,
                account: AccountStatus::Unknown,
                last_sync,
            }),
            state_path,
        }
    }

    pub fn status(&self) -> SyncStatus {
        self.state.lock().status.clone()
    }

    pub fn account(&self) -> AccountStatus {
        self.state.lock().account
    }

    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.state.lock().last_sync
    }

    /// The current status as a non-fatal service error, when sync is not possible.
    pub fn remote_error(&self) -> Option<FlowError> {
        match self.status() {
            SyncStatus::Offline | SyncStatus::NotSignedIn | SyncStatus::Error(_) => {
                Some(FlowError::RemoteUnavailable(self.status().label()))
            }
            _ => None,
        }
    }

    /// Ask the remote for account status and fold the answer into the status.
    pub async fn check_account_status(&self) -> AccountStatus {
        let account = match self.remote.account_status().await {
            Ok(account) => account,
            Err(e) => {
                log::warn!("Account status check failed: {}", e);
                AccountStatus::CouldNotDetermine
            }
        };

        {
            let mut state = self.state.lock();
            state.account = account;
            let next = match account {
                AccountStatus::Available if state.status == SyncStatus::NotSignedIn => {
                    Some(SyncStatus::Idle)
                }
                AccountStatus::NoAccount | AccountStatus::Restricted => Some(SyncStatus::NotSignedIn),
                AccountStatus::CouldNotDetermine => Some(SyncStatus::Error(
                    "Could not determine iCloud account status".to_string(),
                )),
                AccountStatus::TemporarilyUnavailable => Some(SyncStatus::Offline),
                AccountStatus::Available | AccountStatus::Unknown => None,
            };
            if let Some(next) = next {
                log::info!("Sync status {:?} -> {:?} (account {:?})", state.status, next, account);
                state.status = next;
            }
        }

        if account == AccountStatus::Available {
            if let Err(e) = self.remote.subscribe_for_changes().await {
                log::warn!("Change subscription failed: {}", e);
            }
        }
        account
    }

    /// Run one sync round trip if the account allows it.
    ///
    /// Without an available account no remote call is made. An offline or
    /// undetermined account keeps its current status; the other unavailable
    /// states read as `NotSignedIn`. A call while a round trip is already
    /// running returns `Syncing` at once and does not wait for it.
    pub async fn trigger_sync(&self, now: DateTime<Utc>) -> SyncStatus {
        {
            let mut state = self.state.lock();
            if state.account != AccountStatus::Available {
                if matches!(
                    state.account,
                    AccountStatus::NoAccount | AccountStatus::Restricted | AccountStatus::Unknown
                ) {
                    state.status = SyncStatus::NotSignedIn;
                }
                log::debug!("Sync skipped, account is {:?}", state.account);
                return state.status.clone();
            }
            if state.status == SyncStatus::Syncing {
                return SyncStatus::Syncing;
            }
            state.status = SyncStatus::Syncing;
        }

        let result = self.remote.sync().await;

        let next = match result {
            Ok(()) => {
                self.persist(now);
                log::info!("Sync completed");
                SyncStatus::Synced
            }
            Err(RemoteError::Unavailable(msg)) => {
                log::warn!("Sync unavailable: {}", msg);
                SyncStatus::Offline
            }
            Err(RemoteError::Interrupted(msg)) => {
                log::warn!("Sync interrupted: {}", msg);
                SyncStatus::Error(msg)
            }
        };
        let mut state = self.state.lock();
        if next == SyncStatus::Synced {
            state.last_sync = Some(now);
        }
        state.status = next.clone();
        next
    }

    fn persist(&self, last_sync: DateTime<Utc>) {
        let Some(path) = self.state_path.as_deref() else {
            return;
        };
        let doc = PersistedSyncState {
            last_sync_at: Some(last_sync),
        };
        let result = serde_json::to_string(&doc)
            .map_err(|e| e.to_string())
            .and_then(|json| atomic_write_str(path, &json).map_err(|e| e.to_string()));
        if let Err(e) = result {
            log::warn!("Could not persist last sync time: {}", e);
        }
    }
}

fn load_last_sync(path: &Path) -> Option<DateTime<Utc>> {
    let raw = std::fs::read_to_string(path).ok()?;
    match serde_json::from_str::<PersistedSyncState>(&raw) {
        Ok(doc) => doc.last_sync_at,
        Err(e) => {
            log::warn!("Ignoring unreadable sync state: {}", e);
            None
        }
    }
}

//! Shared inbox bridge.
//!
//! A directory inside the app-group container that both the main app and the
//! capture process can see. Each key is one JSON document (`<dir>/<key>.json`)
//! replaced wholesale on every write. There is no cross-process lock: two
//! captures racing on `pendingProspects` resolve last-writer-wins. That is
//! acceptable only because captures happen at human speed, seconds apart.
//!
//! Readers are tolerant: unknown fields are ignored, missing optional fields
//! default, and an undecodable document reads as absent (logged, never fatal).

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::util::atomic_write_str;

pub const PENDING_PROSPECTS_KEY: &str = "pendingProspects";
pub const ENTITLEMENT_SNAPSHOT_KEY: &str = "entitlementSnapshot";
pub const WIDGET_DATA_KEY: &str = "widgetData";

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Shared container I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not encode shared document: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A prospect captured outside the main app, waiting to be imported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingProspect {
    /// Capture id. Carried onto the imported prospect as its import key.
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub handle: Option<String>,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub stage: String,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub is_hot_lead: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanTier {
    Free,
    Pro,
}

impl PlanTier {
    pub fn from_is_pro(is_pro: bool) -> Self {
        if is_pro {
            PlanTier::Pro
        } else {
            PlanTier::Free
        }
    }

    pub fn is_pro(&self) -> bool {
        matches!(self, PlanTier::Pro)
    }
}

/// Minimal plan projection the capture process reads to self-enforce limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitlementSnapshot {
    pub plan: PlanTier,
    #[serde(default)]
    pub prospect_count: usize,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Handle on the shared container directory.
#[derive(Debug, Clone)]
pub struct SharedContainer {
    dir: PathBuf,
}

impl SharedContainer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    /// Read and decode one document. Absent and undecodable both yield `None`.
    pub fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, BridgeError> {
        let path = self.key_path(key);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                log::warn!("Shared document '{}' is unreadable, treating as empty: {}", key, e);
                Ok(None)
            }
        }
    }

    pub fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), BridgeError> {
        let json = serde_json::to_string(value)?;
        atomic_write_str(&self.key_path(key), &json)?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<(), BridgeError> {
        match std::fs::remove_file(self.key_path(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    // =========================================================================
    // Pending prospects
    // =========================================================================

    /// Every staged entry, in capture order. Fails open to an empty list.
    pub fn pending_prospects(&self) -> Vec<PendingProspect> {
        match self.read_json::<Vec<PendingProspect>>(PENDING_PROSPECTS_KEY) {
            Ok(entries) => entries.unwrap_or_default(),
            Err(e) => {
                log::warn!("Could not read pending prospects: {}", e);
                Vec::new()
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending_prospects().len()
    }

    /// Read the list, append one entry, write the whole list back.
    pub fn append_pending(&self, entry: PendingProspect) -> Result<(), BridgeError> {
        let mut pending = self.pending_prospects();
        pending.push(entry);
        self.write_json(PENDING_PROSPECTS_KEY, &pending)
    }

    /// Remove exactly the given entries, re-reading first so entries staged
    /// since the caller's read survive. Returns how many were removed.
    pub fn remove_pending(&self, processed: &[PendingProspect]) -> Result<usize, BridgeError> {
        if processed.is_empty() {
            return Ok(0);
        }
        let mut remaining = self.pending_prospects();
        let before = remaining.len();
        for done in processed {
            if let Some(pos) = remaining.iter().position(|entry| entry == done) {
                remaining.remove(pos);
            }
        }
        let removed = before - remaining.len();
        if remaining.is_empty() {
            self.remove(PENDING_PROSPECTS_KEY)?;
        } else {
            self.write_json(PENDING_PROSPECTS_KEY, &remaining)?;
        }
        Ok(removed)
    }

    pub fn clear_pending(&self) -> Result<(), BridgeError> {
        self.remove(PENDING_PROSPECTS_KEY)
    }

    // =========================================================================
    // Entitlement snapshot
    // =========================================================================

    pub fn entitlement_snapshot(&self) -> Option<EntitlementSnapshot> {
        match self.read_json(ENTITLEMENT_SNAPSHOT_KEY) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                log::warn!("Could not read entitlement snapshot: {}", e);
                None
            }
        }
    }

    pub fn write_entitlement_snapshot(&self, snapshot: &EntitlementSnapshot) -> Result<(), BridgeError> {
        self.write_json(ENTITLEMENT_SNAPSHOT_KEY, snapshot)
    }
}

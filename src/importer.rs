//! Reconciliation importer: drains the shared inbox into the entity store.
//!
//! Ordering per drain:
//! 1. Read the whole pending list.
//! 2. Insert every importable entry inside one store transaction.
//! 3. After commit, remove exactly the processed entries from the bridge.
//!
//! A crash between 2 and 3 leaves entries staged that are already stored. The
//! capture id travels onto the prospect as its import key, so the next drain
//! recognises them and only clears them. Entries written without a capture id
//! keep at-least-once semantics.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::bridge::{PendingProspect, SharedContainer};
use crate::db::{DbProspect, FlowDb};
use crate::entitlement::can_add_prospect;
use crate::error::FlowError;
use crate::types::{FunnelStage, Platform};

/// Outcome of one drain call. Counts cover this call only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainReport {
    /// Newly created prospects.
    pub imported: usize,
    /// Entries with a blank name, discarded without import.
    pub dropped: usize,
    /// Entries whose capture id was already imported by an earlier drain.
    pub duplicates: usize,
    /// Entries left staged because the free plan limit was reached.
    pub deferred: usize,
}

/// Build the prospect a pending entry describes, or `None` for a blank name.
pub fn prospect_from_pending(entry: &PendingProspect, now: DateTime<Utc>) -> Option<DbProspect> {
    let name = entry.name.trim();
    if name.is_empty() {
        return None;
    }
    let captured_at = entry.created_at.filter(|t| *t <= now).unwrap_or(now);

    let mut prospect = DbProspect::new(
        name,
        Platform::parse(&entry.platform).unwrap_or(Platform::Other),
        FunnelStage::parse(&entry.stage).unwrap_or(FunnelStage::New),
        captured_at,
    );
    prospect.handle = non_blank(entry.handle.as_deref());
    prospect.notes = non_blank(entry.notes.as_deref());
    prospect.is_hot_lead = entry.is_hot_lead;
    prospect.touch(now);
    prospect.import_key = non_blank(Some(&entry.id));
    Some(prospect)
}

fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Import every staged entry the plan allows, then clear what was processed.
pub fn drain(
    db: &FlowDb,
    inbox: &SharedContainer,
    is_pro: bool,
    now: DateTime<Utc>,
) -> Result<DrainReport, FlowError> {
    let pending = inbox.pending_prospects();
    if pending.is_empty() {
        return Ok(DrainReport::default());
    }

    let (report, processed) = db.with_transaction(|tx| -> Result<_, FlowError> {
        let mut report = DrainReport::default();
        let mut processed: Vec<PendingProspect> = Vec::with_capacity(pending.len());
        let mut count = tx.count_prospects()?;

        for entry in &pending {
            let Some(prospect) = prospect_from_pending(entry, now) else {
                report.dropped += 1;
                processed.push(entry.clone());
                continue;
            };

            if let Some(ref key) = prospect.import_key {
                if tx.import_key_exists(key)? {
                    report.duplicates += 1;
                    processed.push(entry.clone());
                    continue;
                }
            }

            if !can_add_prospect(count, is_pro) {
                report.deferred += 1;
                continue;
            }

            if tx.insert_imported_prospect(&prospect)? {
                report.imported += 1;
                count += 1;
            } else {
                report.duplicates += 1;
            }
            processed.push(entry.clone());
        }
        Ok((report, processed))
    })?;

    // The store is durable from here on; a failed clear only costs a re-scan.
    if let Err(e) = inbox.remove_pending(&processed) {
        log::error!("Imported entries could not be cleared from the shared inbox: {}", e);
    }

    log::info!(
        "Drained shared inbox: {} imported, {} dropped, {} duplicates, {} deferred",
        report.imported,
        report.dropped,
        report.duplicates,
        report.deferred
    );
    Ok(report)
}

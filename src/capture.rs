//! Share capture: the logic the external capture process runs.
//!
//! It never opens the entity store. It reads the entitlement snapshot and the
//! pending list from the shared container, decides whether to stage, and
//! appends one entry. The limit check is advisory: two captures racing can
//! both pass it, and the importer re-checks at drain time.

use chrono::{DateTime, Utc};
use serde::Serialize;
use url::Url;

use crate::bridge::{PendingProspect, SharedContainer};
use crate::entitlement::FREE_PROSPECT_LIMIT;
use crate::error::FlowError;
use crate::types::{FunnelStage, Platform};

/// Name and handle suggested from shared content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Prefill {
    pub name: Option<String>,
    pub handle: Option<String>,
}

/// Shared text: `@handle`, `anything@handle`, or a plain name.
pub fn prefill_from_text(text: &str) -> Prefill {
    let text = text.trim();
    if text.is_empty() {
        return Prefill::default();
    }
    if let Some(handle) = text.strip_prefix('@') {
        return Prefill {
            name: None,
            handle: Some(handle.to_string()).filter(|h| !h.is_empty()),
        };
    }
    if text.contains('@') {
        let parts: Vec<&str> = text.split('@').filter(|p| !p.is_empty()).collect();
        let handle = if parts.len() >= 2 {
            parts.last().map(|p| p.to_string())
        } else {
            None
        };
        return Prefill { name: None, handle };
    }
    Prefill {
        name: Some(text.to_string()),
        handle: None,
    }
}

/// Shared URL: the first path segment of an Instagram or Facebook profile link.
pub fn prefill_from_url(raw: &str) -> Prefill {
    let Ok(url) = Url::parse(raw.trim()) else {
        return Prefill::default();
    };
    let Some(host) = url.host_str() else {
        return Prefill::default();
    };
    if !(host.contains("instagram.com") || host.contains("facebook.com")) {
        return Prefill::default();
    }
    let handle = url
        .path_segments()
        .and_then(|mut segments| segments.find(|s| !s.is_empty()))
        .map(str::to_string);
    Prefill { name: None, handle }
}

/// Platform implied by a shared URL, if any.
pub fn platform_from_url(raw: &str) -> Option<Platform> {
    let url = Url::parse(raw.trim()).ok()?;
    let host = url.host_str()?;
    if host.contains("instagram.com") {
        Some(Platform::Instagram)
    } else if host.contains("facebook.com") {
        Some(Platform::Facebook)
    } else if host.contains("wa.me") || host.contains("whatsapp.com") {
        Some(Platform::Whatsapp)
    } else {
        None
    }
}

#[derive(Debug, Clone)]
pub struct CaptureForm {
    pub name: String,
    pub handle: String,
    pub platform: Platform,
    pub stage: FunnelStage,
    pub notes: String,
    pub is_hot_lead: bool,
}

impl CaptureForm {
    pub fn from_prefill(prefill: Prefill, platform: Platform) -> Self {
        Self {
            name: prefill.name.unwrap_or_default(),
            handle: prefill.handle.unwrap_or_default(),
            platform,
            stage: FunnelStage::New,
            notes: String::new(),
            is_hot_lead: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum CaptureOutcome {
    Staged { id: String },
    LimitReached { limit: usize },
}

/// Whether the capture process should show "limit reached" instead of the form.
pub fn limit_reached(container: &SharedContainer) -> bool {
    match container.entitlement_snapshot() {
        Some(snapshot) if !snapshot.plan.is_pro() => {
            snapshot.prospect_count + container.pending_count() >= FREE_PROSPECT_LIMIT
        }
        _ => false,
    }
}

/// Validate the form and append it to the shared inbox.
pub fn stage_capture(
    container: &SharedContainer,
    form: CaptureForm,
    now: DateTime<Utc>,
) -> Result<CaptureOutcome, FlowError> {
    let name = form.name.trim();
    if name.is_empty() {
        return Err(FlowError::Validation("Name is required".to_string()));
    }
    if limit_reached(container) {
        log::info!("Capture refused, free prospect limit reached");
        return Ok(CaptureOutcome::LimitReached {
            limit: FREE_PROSPECT_LIMIT,
        });
    }

    let blank_to_none = |value: &str| Some(value.trim().to_string()).filter(|v| !v.is_empty());
    let entry = PendingProspect {
        id: uuid::Uuid::new_v4().to_string(),
        name: name.to_string(),
        handle: blank_to_none(&form.handle),
        platform: form.platform.as_str().to_string(),
        stage: form.stage.as_str().to_string(),
        notes: blank_to_none(&form.notes),
        is_hot_lead: form.is_hot_lead,
        created_at: Some(now),
    };
    let id = entry.id.clone();
    container.append_pending(entry)?;
    log::info!("Staged captured prospect {}", id);
    Ok(CaptureOutcome::Staged { id })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{EntitlementSnapshot, PlanTier};
    use crate::db::test_utils::at;

    fn container() -> SharedContainer {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_path_buf();
        std::mem::forget(dir);
        SharedContainer::new(path)
    }

    fn form(name: &str) -> CaptureForm {
        CaptureForm::from_prefill(
            Prefill {
                name: Some(name.into()),
                handle: None,
            },
            Platform::Instagram,
        )
    }

    #[test]
    fn test_prefill_from_text_variants() {
        assert_eq!(prefill_from_text("@jane.doe").handle.as_deref(), Some("jane.doe"));
        assert_eq!(
            prefill_from_text("follow me at insta@jane_d").handle.as_deref(),
            Some("jane_d")
        );
        assert_eq!(prefill_from_text("jane@").handle, None);
        let plain = prefill_from_text("  Jane Doe ");
        assert_eq!(plain.name.as_deref(), Some("Jane Doe"));
        assert_eq!(plain.handle, None);
        assert_eq!(prefill_from_text("   "), Prefill::default());
    }

    #[test]
    fn test_prefill_from_url() {
        assert_eq!(
            prefill_from_url("https://www.instagram.com/jane.doe/?hl=en")
                .handle
                .as_deref(),
            Some("jane.doe")
        );
        assert_eq!(
            prefill_from_url("https://facebook.com/jdoe").handle.as_deref(),
            Some("jdoe")
        );
        assert_eq!(prefill_from_url("https://example.com/jane"), Prefill::default());
        assert_eq!(prefill_from_url("not a url"), Prefill::default());
        assert_eq!(prefill_from_url("https://instagram.com/").handle, None);
        assert_eq!(
            platform_from_url("https://www.instagram.com/jane"),
            Some(Platform::Instagram)
        );
    }

    #[test]
    fn test_stage_capture_appends_entry() {
        let c = container();
        let mut f = form(" Jane ");
        f.handle = "  ".into();
        f.is_hot_lead = true;
        let outcome = stage_capture(&c, f, at("2025-03-10T12:00:00.000Z")).unwrap();
        let CaptureOutcome::Staged { id } = outcome else {
            panic!("expected staged");
        };

        let pending = c.pending_prospects();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, id);
        assert_eq!(pending[0].name, "Jane");
        assert_eq!(pending[0].handle, None);
        assert_eq!(pending[0].platform, "instagram");
        assert_eq!(pending[0].stage, "new");
        assert!(pending[0].is_hot_lead);
    }

    #[test]
    fn test_blank_name_rejected() {
        let c = container();
        assert!(matches!(
            stage_capture(&c, form(""), at("2025-03-10T12:00:00.000Z")),
            Err(FlowError::Validation(_))
        ));
        assert_eq!(c.pending_count(), 0);
    }

    #[test]
    fn test_limit_counts_pending_entries() {
        let c = container();
        let now = at("2025-03-10T12:00:00.000Z");
        c.write_entitlement_snapshot(&EntitlementSnapshot {
            plan: PlanTier::Free,
            prospect_count: 14,
            updated_at: None,
        })
        .unwrap();

        assert!(matches!(
            stage_capture(&c, form("Ann"), now).unwrap(),
            CaptureOutcome::Staged { .. }
        ));
        assert_eq!(
            stage_capture(&c, form("Ben"), now).unwrap(),
            CaptureOutcome::LimitReached { limit: 15 }
        );
        assert_eq!(c.pending_count(), 1);

        c.write_entitlement_snapshot(&EntitlementSnapshot {
            plan: PlanTier::Pro,
            prospect_count: 14,
            updated_at: None,
        })
        .unwrap();
        assert!(!limit_reached(&c));
    }

    #[test]
    fn test_missing_snapshot_allows_capture() {
        let c = container();
        assert!(!limit_reached(&c));
    }
}

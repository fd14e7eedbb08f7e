//! Entitlement gate.
//!
//! Pure decision functions over a plan flag and current counts, plus the
//! cross-process mirror that lets the capture process self-enforce limits.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::bridge::{BridgeError, EntitlementSnapshot, PlanTier, SharedContainer};
use crate::db::FlowDb;
use crate::error::FlowError;

pub const FREE_PROSPECT_LIMIT: usize = 15;
pub const FREE_TEMPLATE_LIMIT: usize = 3;

pub fn can_add_prospect(current_count: usize, is_pro: bool) -> bool {
    is_pro || current_count < FREE_PROSPECT_LIMIT
}

/// `current_custom_count` excludes built-in templates.
pub fn can_add_template(current_custom_count: usize, is_pro: bool) -> bool {
    is_pro || current_custom_count < FREE_TEMPLATE_LIMIT
}

/// AI drafting has no free allowance.
pub fn can_use_ai(is_pro: bool) -> bool {
    is_pro
}

pub fn can_export(is_pro: bool) -> bool {
    is_pro
}

pub fn can_view_ab_analytics(is_pro: bool) -> bool {
    is_pro
}

/// Gated capabilities, named for upgrade prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Feature {
    AddProspect,
    AddTemplate,
    AiDrafting,
    Export,
    AbAnalytics,
}

impl Feature {
    pub fn display_name(&self) -> &'static str {
        match self {
            Feature::AddProspect => "Adding more than 15 prospects",
            Feature::AddTemplate => "Adding more than 3 custom templates",
            Feature::AiDrafting => "AI message drafting",
            Feature::Export => "Data export",
            Feature::AbAnalytics => "A/B analytics",
        }
    }
}

/// Source of the verified "is pro" flag. The core never talks to a payment
/// processor; whatever verifies purchases implements this.
pub trait BillingStatus: Send + Sync {
    fn is_pro(&self) -> bool;
}

/// Fixed plan flag, for tests and for builds without a billing collaborator.
#[derive(Debug, Clone, Copy)]
pub struct StaticPlan(pub bool);

impl BillingStatus for StaticPlan {
    fn is_pro(&self) -> bool {
        self.0
    }
}

/// Plan gate bound to a billing collaborator.
pub struct Entitlements {
    billing: Arc<dyn BillingStatus>,
    last_mirrored: Mutex<Option<(PlanTier, usize)>>,
}

impl Entitlements {
    pub fn new(billing: Arc<dyn BillingStatus>) -> Self {
        Self {
            billing,
            last_mirrored: Mutex::new(None),
        }
    }

    pub fn is_pro(&self) -> bool {
        self.billing.is_pro()
    }

    /// Refuse with `EntitlementDenied` when the current plan does not allow `feature`.
    pub fn check(&self, feature: Feature, db: &FlowDb) -> Result<(), FlowError> {
        let is_pro = self.is_pro();
        let allowed = match feature {
            Feature::AddProspect => can_add_prospect(db.count_prospects()?, is_pro),
            Feature::AddTemplate => can_add_template(db.count_custom_templates()?, is_pro),
            Feature::AiDrafting => can_use_ai(is_pro),
            Feature::Export => can_export(is_pro),
            Feature::AbAnalytics => can_view_ab_analytics(is_pro),
        };
        if allowed {
            Ok(())
        } else {
            log::info!("Entitlement denied: {:?}", feature);
            Err(FlowError::EntitlementDenied(feature))
        }
    }

    /// Write a fresh snapshot when the plan or prospect count changed since
    /// the last mirror. Returns whether a write happened.
    pub fn mirror(
        &self,
        container: &SharedContainer,
        prospect_count: usize,
        now: DateTime<Utc>,
    ) -> Result<bool, BridgeError> {
        let plan = PlanTier::from_is_pro(self.is_pro());
        let mut last = self.last_mirrored.lock();
        if *last == Some((plan, prospect_count)) {
            return Ok(false);
        }
        container.write_entitlement_snapshot(&EntitlementSnapshot {
            plan,
            prospect_count,
            updated_at: Some(now),
        })?;
        *last = Some((plan, prospect_count));
        log::debug!("Mirrored entitlement snapshot: {:?}, {} prospects", plan, prospect_count);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::{at, test_db};
    use crate::db::{DbProspect, DbTemplate};
    use crate::types::{FunnelStage, Platform, TemplateCategory};

    #[test]
    fn test_prospect_limit_boundary() {
        assert!(can_add_prospect(14, false));
        assert!(!can_add_prospect(15, false));
        assert!(can_add_prospect(0, true));
        assert!(can_add_prospect(10_000, true));
    }

    #[test]
    fn test_template_and_pro_only_gates() {
        assert!(can_add_template(2, false));
        assert!(!can_add_template(3, false));
        assert!(can_add_template(99, true));
        assert!(!can_use_ai(false));
        assert!(can_use_ai(true));
        assert!(!can_export(false));
    }

    #[test]
    fn test_check_counts_only_custom_templates() {
        let db = test_db();
        let now = at("2025-03-01T10:00:00.000Z");
        for i in 0..7 {
            db.insert_template(&DbTemplate::new(
                &format!("Stock {i}"),
                TemplateCategory::FollowUp,
                "Hi",
                true,
                now,
            ))
            .unwrap();
        }
        let gate = Entitlements::new(Arc::new(StaticPlan(false)));
        assert!(gate.check(Feature::AddTemplate, &db).is_ok());

        for i in 0..3 {
            db.insert_template(&DbTemplate::new(
                &format!("Mine {i}"),
                TemplateCategory::Custom,
                "Hi",
                false,
                now,
            ))
            .unwrap();
        }
        let err = gate.check(Feature::AddTemplate, &db).unwrap_err();
        assert!(matches!(err, FlowError::EntitlementDenied(Feature::AddTemplate)));
    }

    #[test]
    fn test_check_prospect_limit_against_store() {
        let db = test_db();
        let now = at("2025-03-01T10:00:00.000Z");
        for i in 0..FREE_PROSPECT_LIMIT {
            db.insert_prospect(&DbProspect::new(
                &format!("P{i}"),
                Platform::Sms,
                FunnelStage::New,
                now,
            ))
            .unwrap();
        }
        let free = Entitlements::new(Arc::new(StaticPlan(false)));
        let pro = Entitlements::new(Arc::new(StaticPlan(true)));
        assert!(free.check(Feature::AddProspect, &db).unwrap_err().requires_upgrade());
        assert!(pro.check(Feature::AddProspect, &db).is_ok());
    }

    #[test]
    fn test_mirror_writes_only_on_change() {
        let dir = tempfile::tempdir().unwrap();
        let container = SharedContainer::new(dir.path());
        let gate = Entitlements::new(Arc::new(StaticPlan(false)));
        let now = at("2025-03-01T10:00:00.000Z");

        assert!(gate.mirror(&container, 3, now).unwrap());
        assert!(!gate.mirror(&container, 3, now).unwrap());
        assert!(gate.mirror(&container, 4, now).unwrap());

        let snap = container.entitlement_snapshot().unwrap();
        assert_eq!(snap.plan, PlanTier::Free);
        assert_eq!(snap.prospect_count, 4);
    }
}

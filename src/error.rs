//! Service-boundary error taxonomy.
//!
//! Errors are classified by how the caller should react:
//! - Retryable: persistence hiccups, remote service unavailable
//! - RequiresUpgrade: a plan limit refused the action
//! - NonRetryable: bad input, missing records, failed generation
//!
//! None of these should crash the process. The only fatal case is
//! `StoreUnavailable`, raised when neither a file nor an in-memory store opens.

use thiserror::Error;

use crate::bridge::BridgeError;
use crate::db::DbError;
use crate::drafting::GenerationError;
use crate::entitlement::Feature;

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("{0}")]
    Validation(String),

    #[error("Could not save changes: {0}")]
    Persistence(#[from] DbError),

    #[error("Could not reach the shared container: {0}")]
    Bridge(#[from] BridgeError),

    #[error("{} requires DMFlow Pro", .0.display_name())]
    EntitlementDenied(Feature),

    #[error("Sync unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("Message generation failed: {0}")]
    GenerationFailed(#[from] GenerationError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("No usable record store: {0}")]
    StoreUnavailable(String),
}

impl FlowError {
    pub fn is_retryable(&self) -> bool {
        match self {
            FlowError::Persistence(_) | FlowError::Bridge(_) | FlowError::RemoteUnavailable(_) => {
                true
            }
            FlowError::GenerationFailed(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// True when the action was refused by the plan gate and an upgrade prompt
    /// should be shown instead.
    pub fn requires_upgrade(&self) -> bool {
        matches!(
            self,
            FlowError::EntitlementDenied(_)
                | FlowError::GenerationFailed(GenerationError::QuotaOrPlanRequired)
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, FlowError::StoreUnavailable(_))
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            FlowError::Validation(_) => "Check the highlighted field and try again.",
            FlowError::Persistence(_) => "Your change was not saved. Try again.",
            FlowError::Bridge(_) => "Check available storage and try again.",
            FlowError::EntitlementDenied(_) => "Upgrade to Pro to remove this limit.",
            FlowError::RemoteUnavailable(_) => {
                "Your data is safe on this device. Sync resumes when iCloud is available."
            }
            FlowError::GenerationFailed(e) => e.recovery_suggestion(),
            FlowError::NotFound(_) => "The record may have been deleted. Refresh and try again.",
            FlowError::StoreUnavailable(_) => "Restart DMFlow. If this keeps happening, free up storage.",
        }
    }
}

/// Serializable notice for banner/alert display.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserNotice {
    pub message: String,
    pub notice_type: NoticeType,
    pub can_retry: bool,
    pub recovery_suggestion: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub enum NoticeType {
    Retryable,
    NonRetryable,
    RequiresUpgrade,
    Fatal,
}

impl From<&FlowError> for UserNotice {
    fn from(err: &FlowError) -> Self {
        let notice_type = if err.is_fatal() {
            NoticeType::Fatal
        } else if err.requires_upgrade() {
            NoticeType::RequiresUpgrade
        } else if err.is_retryable() {
            NoticeType::Retryable
        } else {
            NoticeType::NonRetryable
        };

        UserNotice {
            message: err.to_string(),
            notice_type,
            can_retry: err.is_retryable(),
            recovery_suggestion: err.recovery_suggestion().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let persistence = FlowError::Persistence(DbError::Corrupt("x".into()));
        assert!(persistence.is_retryable());
        assert!(!persistence.requires_upgrade());

        let denied = FlowError::EntitlementDenied(Feature::AddProspect);
        assert!(denied.requires_upgrade());
        assert!(!denied.is_retryable());

        assert!(!FlowError::Validation("Name is required".into()).is_retryable());
        assert!(FlowError::StoreUnavailable("disk".into()).is_fatal());
    }

    #[test]
    fn test_plan_required_generation_counts_as_upgrade() {
        let err = FlowError::from(GenerationError::QuotaOrPlanRequired);
        assert!(err.requires_upgrade());
        let err = FlowError::from(GenerationError::ProviderError("503".into()));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_user_notice_serialization() {
        let err = FlowError::EntitlementDenied(Feature::AiDrafting);
        let notice = UserNotice::from(&err);
        let json = serde_json::to_value(&notice).unwrap();
        assert_eq!(json["noticeType"], "requiresUpgrade");
        assert_eq!(json["canRetry"], false);
        assert_eq!(json["message"], "AI message drafting requires DMFlow Pro");
        assert!(json.get("recoverySuggestion").is_some());
    }
}

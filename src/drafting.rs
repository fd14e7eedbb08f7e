//! AI follow-up drafting.
//!
//! A [`DraftSession`] belongs to one open drafting screen. It runs at most one
//! generation at a time: starting another, or dismissing the screen, aborts
//! the one in flight. A finished draft is only applied when the prospect it
//! was written for has not changed since.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::task::AbortHandle;

use crate::db::{stored_instant, DbProspect, FlowDb};
use crate::entitlement::{can_use_ai, Feature};
use crate::error::FlowError;
use crate::types::FunnelStage;

#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    #[error("AI features require an API key")]
    NoCredential,

    #[error("AI message suggestions require DMFlow Pro")]
    QuotaOrPlanRequired,

    #[error("AI error: {0}")]
    ProviderError(String),

    #[error("Generation cancelled")]
    Cancelled,
}

impl GenerationError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, GenerationError::ProviderError(_))
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            GenerationError::NoCredential => "Contact support for help.",
            GenerationError::QuotaOrPlanRequired => "Upgrade to Pro to draft messages with AI.",
            GenerationError::ProviderError(_) => "Failed to get a response from AI. Please try again.",
            GenerationError::Cancelled => "Start a new draft when you're ready.",
        }
    }
}

/// Text generation backend.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, GenerationError>;
}

fn stage_context(stage: FunnelStage) -> &'static str {
    match stage {
        FunnelStage::New => "This is a new prospect you haven't reached out to yet. Write an initial outreach message that's friendly and non-salesy.",
        FunnelStage::Engaged => "This prospect has shown interest and you're in active conversation. Write a message that moves toward discussing how you can help them.",
        FunnelStage::Presented => "You've already pitched your product/opportunity. Write a follow-up that addresses potential concerns without being pushy.",
        FunnelStage::FollowUp => "This prospect needs nurturing. Write a value-add message that provides something helpful without asking for anything.",
        FunnelStage::Client => "This is a converted client. Write a check-in message to maintain the relationship and ensure they're happy.",
        FunnelStage::Dnd => "This prospect asked not to be contacted. Write a brief, respectful check-in that gives them an easy out.",
    }
}

pub fn build_prompt(prospect: &DbProspect) -> String {
    let platform = prospect.platform.display_name();
    let mut prompt = format!(
        "You are helping a network marketer write a follow-up DM message.\n\n\
         Prospect details:\n\
         - Name: {}\n\
         - Platform: {}\n\
         - Current stage: {}",
        prospect.name,
        platform,
        prospect.stage.display_name()
    );
    if let Some(handle) = prospect.handle.as_deref().filter(|h| !h.is_empty()) {
        prompt.push_str(&format!("\n- Handle: @{}", handle));
    }
    if let Some(notes) = prospect.notes.as_deref().filter(|n| !n.is_empty()) {
        prompt.push_str(&format!("\n- Notes: {}", notes));
    }
    prompt.push_str("\n\n");
    prompt.push_str(stage_context(prospect.stage));
    prompt.push_str(&format!(
        "\n\nGuidelines:\n\
         - Keep it short (2-3 sentences max)\n\
         - Be conversational and authentic\n\
         - Don't be salesy or use hype words\n\
         - Match the casual tone of {}\n\
         - Don't use emojis excessively\n\n\
         Write only the message, nothing else.",
        platform
    ));
    prompt
}

/// A generated message and the prospect version it was written against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft {
    pub prospect_id: String,
    pub prospect_updated_at: DateTime<Utc>,
    pub text: String,
}

impl Draft {
    /// Compared at store precision, so a prospect read back from the store
    /// matches the in-memory copy the draft was started from.
    pub fn is_current_for(&self, prospect: &DbProspect) -> bool {
        prospect.id == self.prospect_id
            && stored_instant(prospect.updated_at) == stored_instant(self.prospect_updated_at)
    }
}

#[derive(Default)]
struct InFlight {
    seq: u64,
    handle: Option<AbortHandle>,
}

/// Aborts the spawned generation when the awaiting future is dropped early.
struct AbortOnDrop<'a> {
    in_flight: &'a Mutex<InFlight>,
    seq: u64,
}

impl Drop for AbortOnDrop<'_> {
    fn drop(&mut self) {
        let mut state = self.in_flight.lock();
        if state.seq != self.seq {
            return;
        }
        if let Some(handle) = state.handle.take() {
            handle.abort();
            log::debug!("Draft request dropped, generation aborted");
        }
    }
}

pub struct DraftSession {
    generator: Arc<dyn TextGenerator>,
    in_flight: Mutex<InFlight>,
}

impl DraftSession {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            generator,
            in_flight: Mutex::new(InFlight::default()),
        }
    }

    pub fn is_generating(&self) -> bool {
        self.in_flight.lock().handle.is_some()
    }

    /// Generate a draft for `prospect`, superseding any generation already running.
    pub async fn generate(&self, prospect: &DbProspect, is_pro: bool) -> Result<Draft, FlowError> {
        if !can_use_ai(is_pro) {
            log::info!("AI drafting refused on the free plan");
            return Err(FlowError::EntitlementDenied(Feature::AiDrafting));
        }

        let prompt = build_prompt(prospect);
        let generator = self.generator.clone();
        let task = tokio::spawn(async move { generator.generate(&prompt).await });

        let seq = {
            let mut state = self.in_flight.lock();
            if let Some(previous) = state.handle.take() {
                previous.abort();
            }
            state.seq += 1;
            state.handle = Some(task.abort_handle());
            state.seq
        };

        let _guard = AbortOnDrop {
            in_flight: &self.in_flight,
            seq,
        };
        let joined = task.await;

        {
            let mut state = self.in_flight.lock();
            if state.seq != seq {
                return Err(GenerationError::Cancelled.into());
            }
            state.handle = None;
        }

        let text = match joined {
            Ok(result) => result?,
            Err(e) if e.is_cancelled() => return Err(GenerationError::Cancelled.into()),
            Err(e) => return Err(GenerationError::ProviderError(e.to_string()).into()),
        };
        let text = text.trim().to_string();
        if text.is_empty() {
            log::warn!("Generator returned an empty draft");
            return Err(GenerationError::ProviderError("empty response".to_string()).into());
        }
        Ok(Draft {
            prospect_id: prospect.id.clone(),
            prospect_updated_at: stored_instant(prospect.updated_at),
            text,
        })
    }

    /// Abort the running generation. Its caller receives `Cancelled`.
    pub fn cancel(&self) {
        let mut state = self.in_flight.lock();
        state.seq += 1;
        if let Some(handle) = state.handle.take() {
            handle.abort();
            log::debug!("Draft generation cancelled");
        }
    }

    /// The draft text when its prospect still exists unchanged, otherwise `None`.
    pub fn accept(&self, db: &FlowDb, draft: Draft) -> Result<Option<String>, FlowError> {
        match db.get_prospect(&draft.prospect_id)? {
            Some(current) if draft.is_current_for(&current) => Ok(Some(draft.text)),
            _ => {
                log::info!("Discarding stale draft for {}", draft.prospect_id);
                Ok(None)
            }
        }
    }
}

impl Drop for DraftSession {
    fn drop(&mut self) {
        if let Some(handle) = self.in_flight.get_mut().handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::{at, test_db};
    use crate::services::prospects::{add_prospect, set_stage, NewProspect};
    use crate::types::Platform;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct SlowGenerator {
        delay: Duration,
        calls: AtomicUsize,
        finished: AtomicUsize,
        result: Result<String, GenerationError>,
    }

    impl SlowGenerator {
        fn replying(delay_ms: u64, text: &str) -> Arc<Self> {
            Arc::new(Self {
                delay: Duration::from_millis(delay_ms),
                calls: AtomicUsize::new(0),
                finished: AtomicUsize::new(0),
                result: Ok(text.to_string()),
            })
        }
    }

    #[async_trait]
    impl TextGenerator for SlowGenerator {
        async fn generate(&self, _prompt: &str) -> Result<String, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.finished.fetch_add(1, Ordering::SeqCst);
            self.result.clone()
        }
    }

    fn prospect() -> DbProspect {
        let mut p = DbProspect::new(
            "Jane",
            Platform::Instagram,
            FunnelStage::Presented,
            at("2025-03-01T10:00:00.000Z"),
        );
        p.handle = Some("jane".into());
        p
    }

    #[test]
    fn test_prompt_mentions_stage_and_handle() {
        let prompt = build_prompt(&prospect());
        assert!(prompt.contains("- Name: Jane"));
        assert!(prompt.contains("- Handle: @jane"));
        assert!(prompt.contains("already pitched"));
        assert!(prompt.contains("casual tone of Instagram"));
        assert!(!prompt.contains("- Notes:"));
    }

    #[tokio::test]
    async fn test_free_plan_is_refused_before_calling_generator() {
        let generator = SlowGenerator::replying(0, "hi");
        let session = DraftSession::new(generator.clone());
        let err = session.generate(&prospect(), false).await.unwrap_err();
        assert!(matches!(err, FlowError::EntitlementDenied(Feature::AiDrafting)));
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_generate_trims_and_tags_prospect_version() {
        let session = DraftSession::new(SlowGenerator::replying(0, "  Hey Jane!  \n"));
        let p = prospect();
        let draft = session.generate(&p, true).await.unwrap();
        assert_eq!(draft.text, "Hey Jane!");
        assert!(draft.is_current_for(&p));
        assert!(!session.is_generating());
    }

    #[tokio::test]
    async fn test_cancel_discards_in_flight_result() {
        let session = Arc::new(DraftSession::new(SlowGenerator::replying(5_000, "late")));
        let running = {
            let session = session.clone();
            tokio::spawn(async move { session.generate(&prospect(), true).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(session.is_generating());
        session.cancel();

        let result = running.await.unwrap();
        assert!(matches!(
            result,
            Err(FlowError::GenerationFailed(GenerationError::Cancelled))
        ));
        assert!(!session.is_generating());
    }

    #[tokio::test]
    async fn test_new_request_supersedes_previous() {
        let session = Arc::new(DraftSession::new(SlowGenerator::replying(200, "text")));
        let first = {
            let session = session.clone();
            tokio::spawn(async move { session.generate(&prospect(), true).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = session.generate(&prospect(), true).await;

        assert!(second.is_ok());
        assert!(matches!(
            first.await.unwrap(),
            Err(FlowError::GenerationFailed(GenerationError::Cancelled))
        ));
    }

    #[tokio::test]
    async fn test_provider_error_surfaces_as_retryable() {
        let generator = Arc::new(SlowGenerator {
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
            result: Err(GenerationError::ProviderError("HTTP 503".into())),
        });
        let session = DraftSession::new(generator);
        let err = session.generate(&prospect(), true).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_accept_rejects_changed_prospect() {
        let db = test_db();
        let mut p = prospect();
        db.insert_prospect(&p).unwrap();
        let session = DraftSession::new(SlowGenerator::replying(0, "Hi"));

        let draft = session.generate(&p, true).await.unwrap();
        assert_eq!(session.accept(&db, draft.clone()).unwrap().as_deref(), Some("Hi"));

        p.notes = Some("changed".into());
        p.touch(at("2025-03-02T10:00:00.000Z"));
        db.update_prospect(&p).unwrap();
        assert_eq!(session.accept(&db, draft).unwrap(), None);
    }

    #[tokio::test]
    async fn test_dropped_request_aborts_generation() {
        let generator = SlowGenerator::replying(100, "too late");
        let session = DraftSession::new(generator.clone());
        let dropped =
            tokio::time::timeout(Duration::from_millis(20), session.generate(&prospect(), true))
                .await;
        assert!(dropped.is_err());
        assert!(!session.is_generating());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(generator.finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fresh_draft_accepted_with_wall_clock_times() {
        let db = test_db();
        let p = add_prospect(
            &db,
            NewProspect::named("Jane", Platform::Instagram),
            true,
            chrono::Utc::now(),
        )
        .unwrap();
        let session = DraftSession::new(SlowGenerator::replying(0, "Hi there"));
        let draft = session.generate(&p, true).await.unwrap();
        assert_eq!(
            session.accept(&db, draft.clone()).unwrap().as_deref(),
            Some("Hi there")
        );

        let later = chrono::Utc::now() + chrono::Duration::seconds(1);
        let moved = set_stage(&db, &p.id, FunnelStage::Engaged, later).unwrap();
        let redraft = session.generate(&moved, true).await.unwrap();
        assert_eq!(session.accept(&db, draft).unwrap(), None);
        assert_eq!(
            session.accept(&db, redraft).unwrap().as_deref(),
            Some("Hi there")
        );
    }
}

//! Follow-up calendar mirroring.
//!
//! Each prospect with a follow-up gets one all-day event keyed by its id, so a
//! re-sync updates the event rather than adding another.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;

use crate::db::DbProspect;
use crate::pipeline::Clock;

#[async_trait]
pub trait CalendarProvider: Send + Sync {
    async fn request_access(&self) -> bool;

    /// Create or replace the event stored under `prospect_id`.
    async fn upsert_event(
        &self,
        prospect_id: &str,
        title: &str,
        date: NaiveDate,
        notes: &str,
    ) -> Result<(), String>;

    /// Removing an event that does not exist is not an error.
    async fn remove_event(&self, prospect_id: &str) -> Result<(), String>;
}

pub fn event_title(prospect: &DbProspect) -> String {
    format!("Follow up with {}", prospect.name)
}

pub fn event_notes(prospect: &DbProspect) -> String {
    let mut notes = format!("Platform: {}", prospect.platform.display_name());
    if let Some(handle) = prospect.handle.as_deref().filter(|h| !h.is_empty()) {
        notes.push_str(&format!("\nHandle: @{}", handle));
    }
    notes.push_str(&format!("\nStage: {}", prospect.stage.display_name()));
    if prospect.is_hot_lead {
        notes.push_str("\n🔥 Hot Lead");
    }
    if let Some(text) = prospect.notes.as_deref().filter(|n| !n.is_empty()) {
        notes.push_str(&format!("\n\nNotes: {}", text));
    }
    notes
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalendarAction {
    Upserted,
    Removed,
    Skipped,
    Failed,
}

pub struct CalendarSync {
    provider: Arc<dyn CalendarProvider>,
    access: Mutex<Option<bool>>,
}

impl CalendarSync {
    pub fn new(provider: Arc<dyn CalendarProvider>) -> Self {
        Self {
            provider,
            access: Mutex::new(None),
        }
    }

    /// Ask once; the answer is remembered for the life of this value.
    async fn has_access(&self) -> bool {
        if let Some(granted) = *self.access.lock() {
            return granted;
        }
        let granted = self.provider.request_access().await;
        if !granted {
            log::warn!("Calendar access not granted");
        }
        *self.access.lock() = Some(granted);
        granted
    }

    pub async fn sync_follow_up(
        &self,
        prospect: &DbProspect,
        clock: &Clock,
        enabled: bool,
    ) -> CalendarAction {
        if !enabled {
            log::debug!("Calendar sync disabled, skipping");
            return CalendarAction::Skipped;
        }
        if !self.has_access().await {
            return CalendarAction::Skipped;
        }

        let result = match prospect.next_follow_up {
            Some(due) => self
                .provider
                .upsert_event(
                    &prospect.id,
                    &event_title(prospect),
                    clock.local_date(&due),
                    &event_notes(prospect),
                )
                .await
                .map(|_| CalendarAction::Upserted),
            None => self
                .provider
                .remove_event(&prospect.id)
                .await
                .map(|_| CalendarAction::Removed),
        };
        result.unwrap_or_else(|e| {
            log::error!("Calendar update failed for {}: {}", prospect.id, e);
            CalendarAction::Failed
        })
    }

    /// Mirror every prospect that has a follow-up. Returns how many events were written.
    pub async fn sync_all(&self, prospects: &[DbProspect], clock: &Clock, enabled: bool) -> usize {
        let mut written = 0;
        for prospect in prospects.iter().filter(|p| p.next_follow_up.is_some()) {
            if self.sync_follow_up(prospect, clock, enabled).await == CalendarAction::Upserted {
                written += 1;
            }
        }
        log::info!("Synced {} follow-ups to calendar", written);
        written
    }

    /// Called when a prospect is deleted.
    pub async fn remove(&self, prospect_id: &str) {
        if let Err(e) = self.provider.remove_event(prospect_id).await {
            log::error!("Failed to remove calendar event for {}: {}", prospect_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_utils::at;
    use crate::types::{FunnelStage, Platform};
    use chrono_tz::Tz;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeCalendar {
        events: Mutex<HashMap<String, (String, NaiveDate, String)>>,
        access_requests: AtomicUsize,
        deny: bool,
    }

    #[async_trait]
    impl CalendarProvider for FakeCalendar {
        async fn request_access(&self) -> bool {
            self.access_requests.fetch_add(1, Ordering::SeqCst);
            !self.deny
        }

        async fn upsert_event(
            &self,
            prospect_id: &str,
            title: &str,
            date: NaiveDate,
            notes: &str,
        ) -> Result<(), String> {
            self.events
                .lock()
                .insert(prospect_id.into(), (title.into(), date, notes.into()));
            Ok(())
        }

        async fn remove_event(&self, prospect_id: &str) -> Result<(), String> {
            self.events.lock().remove(prospect_id);
            Ok(())
        }
    }

    fn prospect() -> DbProspect {
        let mut p = DbProspect::new(
            "Jane Doe",
            Platform::Instagram,
            FunnelStage::Presented,
            at("2025-03-01T10:00:00.000Z"),
        );
        p.handle = Some("jane.doe".into());
        p.notes = Some("Met at the gym".into());
        p.is_hot_lead = true;
        p.next_follow_up = Some(at("2025-03-12T03:00:00.000Z"));
        p
    }

    #[test]
    fn test_event_notes_layout() {
        assert_eq!(
            event_notes(&prospect()),
            "Platform: Instagram\nHandle: @jane.doe\nStage: Presented\n🔥 Hot Lead\n\nNotes: Met at the gym"
        );
        let bare = DbProspect::new(
            "Sam",
            Platform::Sms,
            FunnelStage::New,
            at("2025-03-01T10:00:00.000Z"),
        );
        assert_eq!(event_notes(&bare), "Platform: SMS\nStage: New");
    }

    #[tokio::test]
    async fn test_upsert_uses_local_date_then_remove() {
        let fake = Arc::new(FakeCalendar::default());
        let sync = CalendarSync::new(fake.clone());
        let clock = Clock::new(at("2025-03-10T12:00:00.000Z"), Tz::America__Chicago);
        let mut p = prospect();

        assert_eq!(sync.sync_follow_up(&p, &clock, true).await, CalendarAction::Upserted);
        assert_eq!(sync.sync_follow_up(&p, &clock, true).await, CalendarAction::Upserted);
        {
            let events = fake.events.lock();
            assert_eq!(events.len(), 1);
            let (title, date, _) = &events[&p.id];
            assert_eq!(title, "Follow up with Jane Doe");
            assert_eq!(*date, NaiveDate::from_ymd_opt(2025, 3, 11).unwrap());
        }

        p.next_follow_up = None;
        assert_eq!(sync.sync_follow_up(&p, &clock, true).await, CalendarAction::Removed);
        assert!(fake.events.lock().is_empty());
        assert_eq!(fake.access_requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disabled_or_denied_skips() {
        let fake = Arc::new(FakeCalendar {
            deny: true,
            ..Default::default()
        });
        let sync = CalendarSync::new(fake.clone());
        let clock = Clock::new(at("2025-03-10T12:00:00.000Z"), Tz::UTC);
        let p = prospect();

        assert_eq!(sync.sync_follow_up(&p, &clock, false).await, CalendarAction::Skipped);
        assert_eq!(fake.access_requests.load(Ordering::SeqCst), 0);
        assert_eq!(sync.sync_all(&[p], &clock, true).await, 0);
        assert!(fake.events.lock().is_empty());
    }
}

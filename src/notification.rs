//! Reminder planning.
//!
//! Computes when and what to remind about; a [`Notifier`] collaborator only
//! delivers. Delivery failures are logged and never abort planning.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::db::DbProspect;
use crate::pipeline::{active_due_today, active_overdue, is_active, Clock};
use crate::types::Config;
use crate::util::plural;

pub const MORNING_REMINDER_ID: &str = "morning-reminder";

/// Local notification delivery.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn request_authorization(&self) -> bool;

    /// Schedule (or replace) the notification with this id.
    async fn schedule_at(
        &self,
        id: &str,
        at: DateTime<Utc>,
        title: &str,
        body: &str,
    ) -> Result<(), String>;

    async fn cancel(&self, id: &str) -> Result<(), String>;

    async fn set_badge_count(&self, count: usize) -> Result<(), String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedNotification {
    pub id: String,
    pub at: DateTime<Utc>,
    pub title: String,
    pub body: String,
}

pub fn follow_up_reminder_id(prospect_id: &str) -> String {
    format!("followup-{}", prospect_id)
}

/// Overdue plus due-today, active prospects only.
pub fn badge_count(prospects: &[DbProspect], clock: &Clock) -> usize {
    active_overdue(prospects, clock).len() + active_due_today(prospects, clock).len()
}

/// "You have 2 overdue follow-ups and 1 follow-up scheduled for today".
pub fn morning_reminder_body(overdue: usize, today: usize) -> Option<String> {
    let mut parts = Vec::new();
    if overdue > 0 {
        parts.push(plural(overdue, "overdue follow-up"));
    }
    if today > 0 {
        parts.push(format!("{} scheduled for today", plural(today, "follow-up")));
    }
    if parts.is_empty() {
        return None;
    }
    Some(format!("You have {}", parts.join(" and ")))
}

/// The next `hour:00` local time strictly after now, with today's counts.
pub fn plan_morning_reminder(
    prospects: &[DbProspect],
    clock: &Clock,
    hour: u32,
) -> Option<PlannedNotification> {
    let overdue = active_overdue(prospects, clock).len();
    let today = active_due_today(prospects, clock).len();
    let body = morning_reminder_body(overdue, today)?;

    let mut at = clock.at_local(clock.today(), hour);
    if at <= clock.now {
        at = clock.at_local(clock.today() + Duration::days(1), hour);
    }
    Some(PlannedNotification {
        id: MORNING_REMINDER_ID.to_string(),
        at,
        title: "Good Morning!".to_string(),
        body,
    })
}

/// A reminder at the prospect's follow-up time. None when there is nothing
/// left to remind about: no follow-up, inactive stage, or a time already past.
pub fn plan_follow_up_reminder(prospect: &DbProspect, clock: &Clock) -> Option<PlannedNotification> {
    let at = prospect.next_follow_up?;
    if !is_active(prospect) || at <= clock.now {
        return None;
    }
    Some(PlannedNotification {
        id: follow_up_reminder_id(&prospect.id),
        at,
        title: "Follow-up Reminder".to_string(),
        body: format!("Time to follow up with {}", prospect.name),
    })
}

async fn deliver(notifier: &dyn Notifier, planned: &PlannedNotification) -> bool {
    match notifier
        .schedule_at(&planned.id, planned.at, &planned.title, &planned.body)
        .await
    {
        Ok(()) => true,
        Err(e) => {
            log::warn!("Failed to schedule notification {}: {}", planned.id, e);
            false
        }
    }
}

async fn cancel_quietly(notifier: &dyn Notifier, id: &str) {
    if let Err(e) = notifier.cancel(id).await {
        log::warn!("Failed to cancel notification {}: {}", id, e);
    }
}

/// Schedule or cancel one prospect's follow-up reminder after an edit.
pub async fn sync_follow_up_reminder(
    notifier: &dyn Notifier,
    prospect: &DbProspect,
    clock: &Clock,
    config: &Config,
) -> bool {
    let id = follow_up_reminder_id(&prospect.id);
    cancel_quietly(notifier, &id).await;
    if !config.notifications_enabled {
        return false;
    }
    match plan_follow_up_reminder(prospect, clock) {
        Some(planned) => deliver(notifier, &planned).await,
        None => false,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReminderRefresh {
    pub badge: usize,
    pub morning_scheduled: bool,
}

/// Recompute the badge and the morning reminder from the whole pipeline.
/// With notifications disabled the badge is cleared and the reminder cancelled.
pub async fn refresh_reminders(
    notifier: &dyn Notifier,
    prospects: &[DbProspect],
    clock: &Clock,
    config: &Config,
) -> ReminderRefresh {
    cancel_quietly(notifier, MORNING_REMINDER_ID).await;

    let badge = if config.notifications_enabled {
        badge_count(prospects, clock)
    } else {
        0
    };
    if let Err(e) = notifier.set_badge_count(badge).await {
        log::warn!("Failed to set badge count: {}", e);
    }
    if !config.notifications_enabled {
        return ReminderRefresh::default();
    }

    let morning_scheduled = match plan_morning_reminder(prospects, clock, config.reminder_hour()) {
        Some(planned) => {
            log::debug!("Morning reminder planned for {}", planned.at);
            deliver(notifier, &planned).await
        }
        None => false,
    };
    ReminderRefresh {
        badge,
        morning_scheduled,
    }
}

//! Stage & scheduling engine.
//!
//! Pure functions over a prospect snapshot: funnel moves, follow-up
//! classification against the user's calendar day, and day-count derivations.
//! Nothing here touches the store or the clock directly; callers pass a
//! [`Clock`] so every classification is reproducible.

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::db::DbProspect;
use crate::types::FunnelStage;

/// The linear funnel. `Dnd` is deliberately absent.
pub const PIPELINE: [FunnelStage; 5] = [
    FunnelStage::New,
    FunnelStage::Engaged,
    FunnelStage::Presented,
    FunnelStage::FollowUp,
    FunnelStage::Client,
];

fn pipeline_index(stage: FunnelStage) -> Option<usize> {
    PIPELINE.iter().position(|s| *s == stage)
}

/// One step forward along the funnel. `None` at `Client` and for `Dnd`.
pub fn next_stage(stage: FunnelStage) -> Option<FunnelStage> {
    pipeline_index(stage).and_then(|i| PIPELINE.get(i + 1).copied())
}

/// One step back along the funnel. `None` at `New` and for `Dnd`.
pub fn previous_stage(stage: FunnelStage) -> Option<FunnelStage> {
    pipeline_index(stage)
        .and_then(|i| i.checked_sub(1))
        .and_then(|i| PIPELINE.get(i).copied())
}

/// Client and DND prospects drop out of every "needs attention" view.
pub fn is_active_stage(stage: FunnelStage) -> bool {
    !matches!(stage, FunnelStage::Client | FunnelStage::Dnd)
}

/// A fixed instant plus the timezone that defines "today".
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    pub now: DateTime<Utc>,
    pub tz: Tz,
}

impl Clock {
    pub fn new(now: DateTime<Utc>, tz: Tz) -> Self {
        Self { now, tz }
    }

    pub fn system(tz: Tz) -> Self {
        Self::new(Utc::now(), tz)
    }

    pub fn today(&self) -> NaiveDate {
        self.local_date(&self.now)
    }

    pub fn local_date(&self, instant: &DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.tz).date_naive()
    }

    /// `hour:00` local time on `date`, as a UTC instant.
    ///
    /// A wall time skipped by a DST jump resolves to the same wall time read as UTC.
    pub fn at_local(&self, date: NaiveDate, hour: u32) -> DateTime<Utc> {
        let time = NaiveTime::from_hms_opt(hour.min(23), 0, 0).unwrap_or(NaiveTime::MIN);
        let naive = date.and_time(time);
        match self.tz.from_local_datetime(&naive).earliest() {
            Some(local) => local.with_timezone(&Utc),
            None => Utc.from_utc_datetime(&naive),
        }
    }

    pub fn start_of_today(&self) -> DateTime<Utc> {
        self.at_local(self.today(), 0)
    }
}

/// Follow-up date falls on a calendar day strictly before today.
pub fn is_overdue(prospect: &DbProspect, clock: &Clock) -> bool {
    prospect
        .next_follow_up
        .map(|due| clock.local_date(&due) < clock.today())
        .unwrap_or(false)
}

/// Follow-up date falls on today's calendar day.
pub fn is_due_today(prospect: &DbProspect, clock: &Clock) -> bool {
    prospect
        .next_follow_up
        .map(|due| clock.local_date(&due) == clock.today())
        .unwrap_or(false)
}

pub fn days_since_last_contact(prospect: &DbProspect, clock: &Clock) -> i64 {
    (clock.now - prospect.last_contact).num_days().max(0)
}

pub fn days_in_current_stage(prospect: &DbProspect, clock: &Clock) -> i64 {
    (clock.now - prospect.updated_at).num_days().max(0)
}

pub fn is_active(prospect: &DbProspect) -> bool {
    is_active_stage(prospect.stage)
}

pub fn active_overdue<'a>(prospects: &'a [DbProspect], clock: &Clock) -> Vec<&'a DbProspect> {
    prospects
        .iter()
        .filter(|p| is_active(p) && is_overdue(p, clock))
        .collect()
}

pub fn active_due_today<'a>(prospects: &'a [DbProspect], clock: &Clock) -> Vec<&'a DbProspect> {
    prospects
        .iter()
        .filter(|p| is_active(p) && is_due_today(p, clock))
        .collect()
}

pub fn active_hot_leads(prospects: &[DbProspect]) -> Vec<&DbProspect> {
    prospects
        .iter()
        .filter(|p| is_active(p) && p.is_hot_lead)
        .collect()
}

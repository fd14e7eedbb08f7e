//! Outreach session: a prioritized work queue of prospects needing contact.

use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::{DbProspect, FlowDb};
use crate::error::FlowError;
use crate::pipeline::{is_active, is_due_today, is_overdue, Clock};
use crate::services::prospects::{mark_contacted, snooze_follow_up};

/// Build the session queue: overdue (oldest follow-up first), then due today
/// (by name), then remaining hot leads (most recently contacted first).
/// Only active-pipeline prospects qualify; each prospect appears once; ties
/// break by id.
pub fn build_session_queue(prospects: &[DbProspect], clock: &Clock) -> Vec<DbProspect> {
    let active: Vec<&DbProspect> = prospects.iter().filter(|p| is_active(p)).collect();

    let mut overdue: Vec<&DbProspect> = active
        .iter()
        .copied()
        .filter(|p| is_overdue(p, clock))
        .collect();
    overdue.sort_by(|a, b| {
        a.next_follow_up
            .cmp(&b.next_follow_up)
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut today: Vec<&DbProspect> = active
        .iter()
        .copied()
        .filter(|p| is_due_today(p, clock))
        .collect();
    today.sort_by(|a, b| compare_names(a, b).then_with(|| a.id.cmp(&b.id)));

    let mut hot: Vec<&DbProspect> = active
        .iter()
        .copied()
        .filter(|p| p.is_hot_lead && !is_overdue(p, clock) && !is_due_today(p, clock))
        .collect();
    hot.sort_by(|a, b| {
        b.last_contact
            .cmp(&a.last_contact)
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut seen = HashSet::new();
    overdue
        .into_iter()
        .chain(today)
        .chain(hot)
        .filter(|p| seen.insert(p.id.clone()))
        .cloned()
        .collect()
}

fn compare_names(a: &DbProspect, b: &DbProspect) -> Ordering {
    a.name.to_lowercase().cmp(&b.name.to_lowercase())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub contacted: usize,
    pub skipped: usize,
    pub remaining: usize,
    pub duration_secs: i64,
}

/// Cursor over a queue frozen at session start.
#[derive(Debug)]
pub struct OutreachSession {
    queue: Vec<DbProspect>,
    index: usize,
    contacted: usize,
    skipped: usize,
    started_at: DateTime<Utc>,
    ended: bool,
}

impl OutreachSession {
    pub fn start(prospects: &[DbProspect], clock: &Clock) -> Self {
        let queue = build_session_queue(prospects, clock);
        log::debug!("Outreach session started with {} prospects", queue.len());
        Self {
            queue,
            index: 0,
            contacted: 0,
            skipped: 0,
            started_at: clock.now,
            ended: false,
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn current(&self) -> Option<&DbProspect> {
        if self.ended {
            return None;
        }
        self.queue.get(self.index)
    }

    /// 1-based position and queue length, e.g. "3 of 7".
    pub fn progress(&self) -> (usize, usize) {
        ((self.index + 1).min(self.queue.len()), self.queue.len())
    }

    pub fn is_complete(&self) -> bool {
        self.ended || self.index >= self.queue.len()
    }

    fn advance(&mut self) {
        self.index += 1;
    }

    /// Mark the current prospect contacted and move on.
    pub fn contacted(&mut self, db: &FlowDb, now: DateTime<Utc>) -> Result<(), FlowError> {
        let Some(id) = self.current().map(|p| p.id.clone()) else {
            return Ok(());
        };
        mark_contacted(db, &id, now)?;
        self.contacted += 1;
        self.advance();
        Ok(())
    }

    pub fn skip(&mut self) {
        if self.current().is_some() {
            self.skipped += 1;
            self.advance();
        }
    }

    /// Push the current prospect's follow-up one day out; counts as skipped.
    pub fn snooze(&mut self, db: &FlowDb, now: DateTime<Utc>) -> Result<(), FlowError> {
        let Some(id) = self.current().map(|p| p.id.clone()) else {
            return Ok(());
        };
        snooze_follow_up(db, &id, 1, now)?;
        self.skipped += 1;
        self.advance();
        Ok(())
    }

    /// Stop early. The summary still reports what was done.
    pub fn end(&mut self) {
        self.ended = true;
    }

    pub fn summary(&self, now: DateTime<Utc>) -> SessionSummary {
        SessionSummary {
            contacted: self.contacted,
            skipped: self.skipped,
            remaining: self.queue.len().saturating_sub(self.index),
            duration_secs: (now - self.started_at).num_seconds().max(0),
        }
    }
}

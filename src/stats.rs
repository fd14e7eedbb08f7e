//! Pipeline statistics over a prospect snapshot.

use chrono::Duration;
use serde::Serialize;

use crate::db::DbProspect;
use crate::pipeline::{days_in_current_stage, is_active, is_overdue, Clock};
use crate::types::{FunnelStage, Platform};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageStat {
    pub stage: FunnelStage,
    pub count: usize,
    pub average_days_in_stage: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStats {
    pub total: usize,
    pub active: usize,
    pub clients: usize,
    pub dnd: usize,
    /// Clients as a percentage of all prospects.
    pub conversion_rate: f64,
    pub overdue: usize,
    /// Active prospects with a follow-up that is not overdue, as a percentage.
    /// 100 when no active prospect has a follow-up.
    pub follow_up_compliance: f64,
    pub hot_leads: usize,
    pub stages: Vec<StageStat>,
    /// Platforms with at least one prospect, largest first.
    pub platforms: Vec<(Platform, usize)>,
    pub period_days: i64,
    pub added_in_period: usize,
    pub conversions_in_period: usize,
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    part as f64 / whole as f64 * 100.0
}

pub fn compute(prospects: &[DbProspect], clock: &Clock, period_days: i64) -> PipelineStats {
    let total = prospects.len();
    let clients = prospects
        .iter()
        .filter(|p| p.stage == FunnelStage::Client)
        .count();
    let dnd = prospects.iter().filter(|p| p.stage == FunnelStage::Dnd).count();
    let active: Vec<&DbProspect> = prospects.iter().filter(|p| is_active(p)).collect();
    let overdue = active.iter().filter(|p| is_overdue(p, clock)).count();

    let with_follow_up: Vec<&&DbProspect> =
        active.iter().filter(|p| p.next_follow_up.is_some()).collect();
    let follow_up_compliance = if with_follow_up.is_empty() {
        100.0
    } else {
        let on_time = with_follow_up
            .iter()
            .filter(|p| !is_overdue(p, clock))
            .count();
        percent(on_time, with_follow_up.len())
    };

    let stages = FunnelStage::ALL
        .iter()
        .map(|stage| {
            let in_stage: Vec<&DbProspect> =
                prospects.iter().filter(|p| p.stage == *stage).collect();
            let average_days_in_stage = if in_stage.is_empty() {
                0
            } else {
                let total_days: i64 = in_stage
                    .iter()
                    .map(|p| days_in_current_stage(p, clock))
                    .sum();
                total_days / in_stage.len() as i64
            };
            StageStat {
                stage: *stage,
                count: in_stage.len(),
                average_days_in_stage,
            }
        })
        .collect();

    let mut platforms: Vec<(Platform, usize)> = Platform::ALL
        .iter()
        .map(|platform| {
            (
                *platform,
                prospects.iter().filter(|p| p.platform == *platform).count(),
            )
        })
        .filter(|(_, count)| *count > 0)
        .collect();
    // Stable sort keeps the canonical platform order on ties.
    platforms.sort_by(|a, b| b.1.cmp(&a.1));

    let period_start = clock.now - Duration::days(period_days.max(0));
    let added_in_period = prospects
        .iter()
        .filter(|p| p.created_at >= period_start)
        .count();
    let conversions_in_period = prospects
        .iter()
        .filter(|p| p.stage == FunnelStage::Client && p.updated_at >= period_start)
        .count();

    PipelineStats {
        total,
        active: active.len(),
        clients,
        dnd,
        conversion_rate: percent(clients, total),
        overdue,
        follow_up_compliance,
        hot_leads: active.iter().filter(|p| p.is_hot_lead).count(),
        stages,
        platforms,
        period_days,
        added_in_period,
        conversions_in_period,
    }
}

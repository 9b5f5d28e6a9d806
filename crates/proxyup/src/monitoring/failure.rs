use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::models::{DEAD_AFTER_FAILURES, FailureCategory, FailureRecord, HealthStatus, ProxyResource};

/// Edge in the alive/dead state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    None,
    WentDown,
    Recovered,
}

/// Applies connectivity results to a resource's health fields.
///
/// Status is always derived from the failure count, so the two can never
/// disagree after either call.
pub struct FailureTracker;

impl FailureTracker {
    pub fn record_success(
        resource: &mut ProxyResource,
        checked_at: DateTime<Utc>,
        latency_ms: u64,
    ) -> Transition {
        if let Some(last) = resource.last_check {
            let minutes = (checked_at - last).num_minutes().max(0) as u64;
            resource.uptime_minutes = resource.uptime_minutes.saturating_add(minutes);
        }

        let before = resource.status;
        resource.failures = 0;
        resource.latency_ms = latency_ms;
        resource.last_check = Some(checked_at);
        resource.status = HealthStatus::Alive;

        transition(before, resource.status)
    }

    /// The count keeps growing past the dead threshold. `last_check` is left
    /// alone so the next success measures uptime from the last good check.
    pub fn record_failure(resource: &mut ProxyResource) -> Transition {
        let before = resource.status;
        resource.failures = resource.failures.saturating_add(1);
        resource.status = status_for(resource.failures);

        transition(before, resource.status)
    }
}

fn status_for(failures: u32) -> HealthStatus {
    if failures > DEAD_AFTER_FAILURES { HealthStatus::Dead } else { HealthStatus::Alive }
}

fn transition(before: HealthStatus, after: HealthStatus) -> Transition {
    match (before, after) {
        (HealthStatus::Alive, HealthStatus::Dead) => Transition::WentDown,
        (HealthStatus::Dead, HealthStatus::Alive) => Transition::Recovered,
        _ => Transition::None,
    }
}

/// Rolling failure statistics for one resource
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureStats {
    pub days: u32,
    pub total: usize,
    pub connectivity: usize,
    pub throughput: usize,
    pub egress_ip: usize,
    pub last_failure: Option<DateTime<Utc>>,
    pub failures_per_day: f64,
}

impl FailureStats {
    /// Summarize the records that fall inside the last `days` days.
    pub fn compute(records: &[FailureRecord], days: u32, now: DateTime<Utc>) -> Self {
        let days = days.max(1);
        let since = now - Duration::days(i64::from(days));
        let window: Vec<&FailureRecord> = records.iter().filter(|r| r.timestamp >= since).collect();

        let count = |category: FailureCategory| window.iter().filter(|r| r.category == category).count();

        Self {
            days,
            total: window.len(),
            connectivity: count(FailureCategory::Connectivity),
            throughput: count(FailureCategory::Throughput),
            egress_ip: count(FailureCategory::EgressIp),
            last_failure: window.iter().map(|r| r.timestamp).max(),
            failures_per_day: window.len() as f64 / f64::from(days),
        }
    }
}

use chrono::{DateTime, Duration, Utc};

use crate::models::IpObservation;

/// How long an IP may stay unchanged since its log entry before an alert goes out.
pub const STUCK_ALERT_AFTER_HOURS: i64 = 24;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriftResult {
    /// No earlier observation exists. Logged, but not a change.
    pub first_observation: bool,
    pub changed: bool,
    pub stuck: bool,
    /// IP of the last recorded observation, when there was one
    pub previous_ip: Option<String>,
}

impl DriftResult {
    /// Whether this observation gets its own IP log entry
    pub fn needs_log_entry(&self) -> bool {
        self.first_observation || self.changed
    }
}

/// Classify `observed_ip` against the most recent log entry for the same proxy.
pub fn detect_drift(
    observed_ip: &str,
    observed_at: DateTime<Utc>,
    last: Option<&IpObservation>,
    stuck_threshold: Duration,
) -> DriftResult {
    let Some(last) = last else {
        return DriftResult { first_observation: true, ..Default::default() };
    };

    let previous_ip = Some(last.ip.clone());
    if last.ip != observed_ip {
        return DriftResult { changed: true, previous_ip, ..Default::default() };
    }

    DriftResult {
        stuck: observed_at - last.timestamp > stuck_threshold,
        previous_ip,
        ..Default::default()
    }
}

/// Whole hours between the last log entry and `now`, if an alert is due.
pub fn stuck_alert_due(last_logged_at: DateTime<Utc>, now: DateTime<Utc>) -> Option<i64> {
    let hours = (now - last_logged_at).num_hours();
    (hours >= STUCK_ALERT_AFTER_HOURS).then_some(hours)
}

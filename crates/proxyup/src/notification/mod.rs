//! Alert gating and delivery.

pub mod message;
pub mod sink;

pub use sink::{NotificationSink, NotifyError, NullSink, TelegramSink};

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::models::ProxyResource;
use crate::settings::NotificationSettings;

#[derive(Debug, Clone, PartialEq)]
pub enum Alert {
    Down { error: String },
    Recovered,
    IpChanged { previous_ip: String, new_ip: String },
    IpStuck { ip: String, hours: i64 },
    LowSpeed { download_mbps: f64, upload_mbps: f64, threshold_mbps: f64 },
}

impl Alert {
    pub fn kind(&self) -> &'static str {
        match self {
            Alert::Down { .. } => "down",
            Alert::Recovered => "recovered",
            Alert::IpChanged { .. } => "ip_changed",
            Alert::IpStuck { .. } => "ip_stuck",
            Alert::LowSpeed { .. } => "low_speed",
        }
    }
}

/// Whether the configured toggles allow this alert out
pub fn should_notify(alert: &Alert, flags: &NotificationSettings) -> bool {
    match alert {
        Alert::Down { .. } => flags.on_down,
        Alert::Recovered => flags.on_recovery,
        Alert::IpChanged { .. } => flags.on_ip_change,
        Alert::IpStuck { .. } => flags.on_ip_stuck,
        Alert::LowSpeed { .. } => flags.on_low_speed,
    }
}

/// A zero reading means the measurement produced nothing, not a slow proxy.
pub fn is_low_speed(download_mbps: f64, threshold_mbps: f64) -> bool {
    download_mbps > 0.0 && download_mbps < threshold_mbps
}

/// Formats alerts and hands them to a [`NotificationSink`].
///
/// Delivery is best effort: failures are logged and dropped.
#[derive(Clone)]
pub struct Notifier {
    sink: Arc<dyn NotificationSink>,
}

impl Notifier {
    pub fn new(sink: Arc<dyn NotificationSink>) -> Self {
        Self { sink }
    }

    pub fn disabled() -> Self {
        Self::new(Arc::new(NullSink))
    }

    pub async fn notify(&self, resource: &ProxyResource, alert: Alert, flags: &NotificationSettings) {
        if !should_notify(&alert, flags) {
            debug!(resource = %resource.id, alert = alert.kind(), "Alert suppressed by settings");
            return;
        }

        let text = message::alert(resource, &alert, Utc::now());
        if let Err(err) = self.sink.send(&text).await {
            warn!(resource = %resource.id, alert = alert.kind(), "Failed to deliver notification: {err}");
        }
    }

    /// Daily status digest. Delivery errors are logged, not returned.
    pub async fn send_summary(&self, resources: &[ProxyResource]) {
        let text = message::summary(resources, Utc::now());
        if let Err(err) = self.sink.send(&text).await {
            warn!("Failed to deliver summary: {err}");
        }
    }

    /// Surfaces the delivery error so an operator can fix the channel setup.
    pub async fn send_test(&self) -> Result<(), NotifyError> {
        self.sink.send(&message::test_message(Utc::now())).await
    }
}

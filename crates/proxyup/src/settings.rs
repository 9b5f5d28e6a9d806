use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;

use crate::store::ResourceStore;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("{field} is not a valid URL: {source}")]
    InvalidUrl {
        field: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error("probe timeout must be at least one second")]
    ZeroTimeout,
    #[error("{field} must not be negative")]
    Negative { field: &'static str },
}

/// Alert toggles, one per alert kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationSettings {
    pub on_down: bool,
    pub on_recovery: bool,
    pub on_ip_change: bool,
    pub on_ip_stuck: bool,
    pub on_low_speed: bool,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self { on_down: true, on_recovery: true, on_ip_change: true, on_ip_stuck: true, on_low_speed: true }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeedTestSettings {
    pub download_url: String,
    pub upload_url: String,
    pub upload_bytes: usize,
    /// Per-direction request timeout, separate from the probe timeout
    pub timeout_seconds: u64,
}

impl Default for SpeedTestSettings {
    fn default() -> Self {
        Self {
            download_url: "https://speed.cloudflare.com/__down?bytes=10000000".into(),
            upload_url: "https://speed.cloudflare.com/__up".into(),
            upload_bytes: 2_000_000,
            timeout_seconds: 30,
        }
    }
}

/// Process-wide check configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub health_check_url: String,
    pub egress_ip_url: String,
    pub timeout_seconds: u64,
    pub skip_tls_verify: bool,
    /// `<= 0` disables the liveness scheduler
    pub liveness_interval_minutes: i64,
    /// `<= 0` disables the throughput scheduler and the throughput step
    pub throughput_interval_minutes: i64,
    pub stuck_threshold_hours: i64,
    pub low_speed_threshold_mbps: f64,
    pub speed_test: SpeedTestSettings,
    pub notifications: NotificationSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            health_check_url: "https://google.com".into(),
            egress_ip_url: "https://api.myip.com".into(),
            timeout_seconds: 5,
            skip_tls_verify: false,
            liveness_interval_minutes: 15,
            throughput_interval_minutes: 60,
            stuck_threshold_hours: 12,
            low_speed_threshold_mbps: 10.0,
            speed_test: SpeedTestSettings::default(),
            notifications: NotificationSettings::default(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        let urls = [
            ("health_check_url", &self.health_check_url),
            ("egress_ip_url", &self.egress_ip_url),
            ("speed_test.download_url", &self.speed_test.download_url),
            ("speed_test.upload_url", &self.speed_test.upload_url),
        ];
        for (field, value) in urls {
            url::Url::parse(value).map_err(|source| SettingsError::InvalidUrl { field, source })?;
        }

        if self.timeout_seconds == 0 || self.speed_test.timeout_seconds == 0 {
            return Err(SettingsError::ZeroTimeout);
        }
        if self.stuck_threshold_hours < 0 {
            return Err(SettingsError::Negative { field: "stuck_threshold_hours" });
        }
        if self.low_speed_threshold_mbps < 0.0 {
            return Err(SettingsError::Negative { field: "low_speed_threshold_mbps" });
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn stuck_threshold(&self) -> chrono::Duration {
        chrono::Duration::hours(self.stuck_threshold_hours)
    }

    pub fn throughput_enabled(&self) -> bool {
        self.throughput_interval_minutes > 0
    }
}

/// Shared, read-mostly handle to the current [`Settings`].
///
/// Readers take a snapshot once per batch; the write lock is held only for
/// the swap itself.
#[derive(Debug, Clone)]
pub struct SettingsHandle {
    inner: Arc<RwLock<Settings>>,
}

impl SettingsHandle {
    pub fn new(settings: Settings) -> Self {
        Self { inner: Arc::new(RwLock::new(settings)) }
    }

    pub async fn snapshot(&self) -> Settings {
        self.inner.read().await.clone()
    }

    pub async fn replace(&self, settings: Settings) {
        *self.inner.write().await = settings;
    }

    /// Administrative update: validate, persist, then publish.
    pub async fn apply(&self, store: &dyn ResourceStore, settings: Settings) -> anyhow::Result<()> {
        settings.validate()?;
        store.save_settings(&settings).await?;
        self.replace(settings).await;
        info!("Settings updated");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    #[test]
    fn defaults_are_valid() {
        assert!(Settings::default().validate().is_ok());
    }

    #[test]
    fn rejects_bad_url_and_zero_timeout() {
        let mut settings = Settings { health_check_url: "not a url".into(), ..Default::default() };
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::InvalidUrl { field: "health_check_url", .. })
        ));

        settings.health_check_url = "https://example.com".into();
        settings.timeout_seconds = 0;
        assert!(matches!(settings.validate(), Err(SettingsError::ZeroTimeout)));
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let settings: Settings = serde_json::from_str(r#"{"timeout_seconds": 9}"#).unwrap();
        assert_eq!(settings.timeout_seconds, 9);
        assert_eq!(settings.stuck_threshold_hours, 12);
        assert!(settings.notifications.on_low_speed);
    }

    #[tokio::test]
    async fn apply_persists_and_publishes() {
        let store = MemoryStore::new();
        let handle = SettingsHandle::new(Settings::default());

        let updated = Settings { low_speed_threshold_mbps: 25.0, ..Default::default() };
        handle.apply(&store, updated.clone()).await.unwrap();

        assert_eq!(handle.snapshot().await, updated);
        assert_eq!(store.load_settings().await.unwrap(), Some(updated));
    }

    #[tokio::test]
    async fn invalid_update_keeps_previous_settings() {
        let store = MemoryStore::new();
        let handle = SettingsHandle::new(Settings::default());

        let broken = Settings { timeout_seconds: 0, ..Default::default() };
        assert!(handle.apply(&store, broken).await.is_err());

        assert_eq!(handle.snapshot().await, Settings::default());
        assert_eq!(store.load_settings().await.unwrap(), None);
    }
}

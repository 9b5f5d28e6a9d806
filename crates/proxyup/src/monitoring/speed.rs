use std::time::{Duration, Instant};

use async_trait::async_trait;

use super::checker::ProbeError;
use super::client::ProxyClient;
use crate::settings::Settings;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeedMeasurement {
    pub download_mbps: f64,
    pub upload_mbps: f64,
}

impl SpeedMeasurement {
    pub const ZERO: SpeedMeasurement = SpeedMeasurement { download_mbps: 0.0, upload_mbps: 0.0 };

    /// Either direction came back empty
    pub fn is_zero(&self) -> bool {
        self.download_mbps <= 0.0 || self.upload_mbps <= 0.0
    }
}

#[async_trait]
pub trait SpeedTester: Send + Sync {
    async fn measure(
        &self,
        client: &dyn ProxyClient,
        settings: &Settings,
    ) -> Result<SpeedMeasurement, ProbeError>;
}

/// Times a download and an upload against the configured endpoints
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpSpeedTester;

#[async_trait]
impl SpeedTester for HttpSpeedTester {
    async fn measure(
        &self,
        client: &dyn ProxyClient,
        settings: &Settings,
    ) -> Result<SpeedMeasurement, ProbeError> {
        let cfg = &settings.speed_test;
        let timeout = Duration::from_secs(cfg.timeout_seconds);

        let start = Instant::now();
        let response = client.get_bytes(&cfg.download_url, timeout).await?;
        if !response.is_success() {
            return Err(ProbeError::UnexpectedStatus {
                url: cfg.download_url.clone(),
                status: response.status,
            });
        }
        let download_mbps = mbps(response.body.len(), start.elapsed());

        let start = Instant::now();
        let response = client.post_bytes(&cfg.upload_url, vec![0u8; cfg.upload_bytes], timeout).await?;
        if !response.is_success() {
            return Err(ProbeError::UnexpectedStatus {
                url: cfg.upload_url.clone(),
                status: response.status,
            });
        }
        let upload_mbps = mbps(cfg.upload_bytes, start.elapsed());

        Ok(SpeedMeasurement { download_mbps, upload_mbps })
    }
}

/// Megabits per second for `bytes` moved in `elapsed`
pub fn mbps(bytes: usize, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if bytes == 0 || secs <= 0.0 {
        return 0.0;
    }
    bytes as f64 * 8.0 / secs / 1_000_000.0
}

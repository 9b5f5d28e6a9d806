//! Persistence boundary for proxies, their logs and settings.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{FailureRecord, IpObservation, ProbeFields, ProxyResource, SpeedSample};
use crate::settings::Settings;

#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Every stored proxy, read fresh for each batch
    async fn list_resources(&self) -> Result<Vec<ProxyResource>>;

    async fn get_resource(&self, id: Uuid) -> Result<Option<ProxyResource>>;

    async fn create_resource(&self, resource: &ProxyResource) -> Result<()>;

    /// Returns whether a resource was removed
    async fn delete_resource(&self, id: Uuid) -> Result<bool>;

    /// Write back the probe-owned columns selected by `fields`.
    ///
    /// Saving a resource that has since been deleted does nothing.
    async fn save_resource(&self, resource: &ProxyResource, fields: ProbeFields) -> Result<()>;

    async fn append_ip_observation(&self, entry: &IpObservation) -> Result<()>;

    async fn last_ip_observation(&self, resource_id: Uuid) -> Result<Option<IpObservation>>;

    /// Oldest first
    async fn ip_observations(&self, resource_id: Uuid) -> Result<Vec<IpObservation>>;

    async fn append_failure_record(&self, entry: &FailureRecord) -> Result<()>;

    /// Records at or after `since`, oldest first
    async fn failure_records(
        &self,
        resource_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<FailureRecord>>;

    async fn append_speed_sample(&self, sample: &SpeedSample) -> Result<()>;

    async fn load_settings(&self) -> Result<Option<Settings>>;

    async fn save_settings(&self, settings: &Settings) -> Result<()>;
}

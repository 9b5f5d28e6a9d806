use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::ResourceStore;
use crate::models::{FailureRecord, IpObservation, ProbeFields, ProxyResource, SpeedSample};
use crate::settings::Settings;

#[derive(Debug, Default)]
struct State {
    /// Insertion order, so listings are stable
    order: Vec<Uuid>,
    resources: HashMap<Uuid, ProxyResource>,
    ip_log: Vec<IpObservation>,
    failure_log: Vec<FailureRecord>,
    speed_log: Vec<SpeedSample>,
    settings: Option<Settings>,
}

/// In-process [`ResourceStore`], used by tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_resources(resources: impl IntoIterator<Item = ProxyResource>) -> Self {
        let store = Self::new();
        {
            let mut state = store.state.write().await;
            for resource in resources {
                state.order.push(resource.id);
                state.resources.insert(resource.id, resource);
            }
        }
        store
    }

    pub async fn speed_samples(&self, resource_id: Uuid) -> Vec<SpeedSample> {
        let state = self.state.read().await;
        state.speed_log.iter().filter(|s| s.resource_id == resource_id).cloned().collect()
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn list_resources(&self) -> Result<Vec<ProxyResource>> {
        let state = self.state.read().await;
        Ok(state.order.iter().filter_map(|id| state.resources.get(id).cloned()).collect())
    }

    async fn get_resource(&self, id: Uuid) -> Result<Option<ProxyResource>> {
        Ok(self.state.read().await.resources.get(&id).cloned())
    }

    async fn create_resource(&self, resource: &ProxyResource) -> Result<()> {
        let mut state = self.state.write().await;
        if state.resources.contains_key(&resource.id) {
            anyhow::bail!("resource {} already exists", resource.id);
        }
        state.order.push(resource.id);
        state.resources.insert(resource.id, resource.clone());
        Ok(())
    }

    async fn delete_resource(&self, id: Uuid) -> Result<bool> {
        let mut state = self.state.write().await;
        state.order.retain(|existing| *existing != id);
        Ok(state.resources.remove(&id).is_some())
    }

    async fn save_resource(&self, resource: &ProxyResource, fields: ProbeFields) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(stored) = state.resources.get_mut(&resource.id) {
            fields.copy(resource, stored);
        }
        Ok(())
    }

    async fn append_ip_observation(&self, entry: &IpObservation) -> Result<()> {
        self.state.write().await.ip_log.push(entry.clone());
        Ok(())
    }

    async fn last_ip_observation(&self, resource_id: Uuid) -> Result<Option<IpObservation>> {
        let state = self.state.read().await;
        Ok(state.ip_log.iter().rev().find(|e| e.resource_id == resource_id).cloned())
    }

    async fn ip_observations(&self, resource_id: Uuid) -> Result<Vec<IpObservation>> {
        let state = self.state.read().await;
        Ok(state.ip_log.iter().filter(|e| e.resource_id == resource_id).cloned().collect())
    }

    async fn append_failure_record(&self, entry: &FailureRecord) -> Result<()> {
        self.state.write().await.failure_log.push(entry.clone());
        Ok(())
    }

    async fn failure_records(
        &self,
        resource_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<FailureRecord>> {
        let state = self.state.read().await;
        Ok(state
            .failure_log
            .iter()
            .filter(|r| r.resource_id == resource_id && r.timestamp >= since)
            .cloned()
            .collect())
    }

    async fn append_speed_sample(&self, sample: &SpeedSample) -> Result<()> {
        self.state.write().await.speed_log.push(sample.clone());
        Ok(())
    }

    async fn load_settings(&self) -> Result<Option<Settings>> {
        Ok(self.state.read().await.settings.clone())
    }

    async fn save_settings(&self, settings: &Settings) -> Result<()> {
        self.state.write().await.settings = Some(settings.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProxyAddress;

    #[tokio::test]
    async fn save_after_delete_is_ignored() {
        let resource = ProxyResource::new(ProxyAddress::new("10.0.0.1", 8080));
        let store = MemoryStore::with_resources([resource.clone()]).await;

        assert!(store.delete_resource(resource.id).await.unwrap());
        store.save_resource(&resource, ProbeFields::All).await.unwrap();

        assert!(store.get_resource(resource.id).await.unwrap().is_none());
        assert!(store.list_resources().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn last_observation_is_most_recent() {
        let resource_id = Uuid::new_v4();
        let store = MemoryStore::new();
        for ip in ["1.1.1.1", "2.2.2.2"] {
            store
                .append_ip_observation(&IpObservation {
                    id: Uuid::new_v4(),
                    resource_id,
                    timestamp: Utc::now(),
                    ip: ip.into(),
                    previous_ip: None,
                    country: String::new(),
                    previous_country: String::new(),
                    isp: String::new(),
                    previous_isp: String::new(),
                    stuck: false,
                })
                .await
                .unwrap();
        }

        let last = store.last_ip_observation(resource_id).await.unwrap().unwrap();
        assert_eq!(last.ip, "2.2.2.2");
        assert_eq!(store.ip_observations(resource_id).await.unwrap().len(), 2);
    }
}

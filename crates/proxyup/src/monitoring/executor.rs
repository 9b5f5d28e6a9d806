use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::checker::{Connectivity, EgressInfo, ProbeError, ProbePlan, Prober};
use super::drift::{detect_drift, stuck_alert_due};
use super::failure::{FailureTracker, Transition};
use super::pool::{self, BatchReport, MAX_CONCURRENT_WORKERS};
use super::speed::SpeedMeasurement;
use crate::models::{CheckKind, FailureCategory, FailureRecord, IpObservation, ProxyResource, SpeedSample};
use crate::notification::{Alert, Notifier, is_low_speed};
use crate::settings::{Settings, SettingsHandle};
use crate::store::ResourceStore;

/// Something that can run one full batch of a given check kind
#[async_trait]
pub trait BatchRunner: Send + Sync {
    async fn run_batch(&self, kind: CheckKind, token: CancellationToken) -> Result<BatchReport>;
}

/// Runs the per-proxy pipeline: probe, classify, alert, persist.
#[derive(Clone)]
pub struct CheckExecutor {
    store: Arc<dyn ResourceStore>,
    settings: SettingsHandle,
    prober: Prober,
    notifier: Notifier,
    workers: usize,
}

impl CheckExecutor {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        settings: SettingsHandle,
        prober: Prober,
        notifier: Notifier,
    ) -> Self {
        Self { store, settings, prober, notifier, workers: MAX_CONCURRENT_WORKERS }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Check a single proxy right away, liveness first, then throughput.
    ///
    /// Returns `None` when no proxy has this id.
    pub async fn verify(&self, id: Uuid) -> Result<Option<ProxyResource>> {
        let Some(resource) = self.store.get_resource(id).await? else {
            return Ok(None);
        };
        let settings = self.settings.snapshot().await;

        let resource = self.check_resource(CheckKind::Liveness, resource, &settings).await?;
        let resource = self.check_resource(CheckKind::Throughput, resource, &settings).await?;
        Ok(Some(resource))
    }

    /// Full pipeline for one proxy. Only a failed write of the resource itself
    /// is returned as an error; everything else is recorded and logged.
    pub async fn check_resource(
        &self,
        kind: CheckKind,
        mut resource: ProxyResource,
        settings: &Settings,
    ) -> Result<ProxyResource> {
        let plan = ProbePlan::for_kind(kind, settings, &resource);
        if plan.is_empty() {
            debug!(resource = %resource.id, %kind, "Nothing to check");
            return Ok(resource);
        }

        let outcome = self.prober.probe(&resource, settings, plan).await;
        let now = outcome.checked_at;

        if let Some(result) = outcome.connectivity {
            self.apply_connectivity(&mut resource, result, settings, now).await;
        }
        if let Some(result) = outcome.throughput {
            self.apply_throughput(&mut resource, result, settings, now).await;
        }
        if let Some(result) = outcome.egress {
            self.apply_egress(&mut resource, result, settings, now).await;
        }

        self.store
            .save_resource(&resource, kind.fields())
            .await
            .with_context(|| format!("failed to save proxy {}", resource.label()))?;

        Ok(resource)
    }

    async fn apply_connectivity(
        &self,
        resource: &mut ProxyResource,
        result: Result<Connectivity, ProbeError>,
        settings: &Settings,
        now: DateTime<Utc>,
    ) {
        match result {
            Ok(connectivity) => {
                let transition = FailureTracker::record_success(resource, now, connectivity.latency_ms);
                debug!(resource = %resource.id, latency_ms = connectivity.latency_ms, "Proxy reachable");

                if transition == Transition::Recovered {
                    info!(resource = %resource.id, "Proxy {} recovered", resource.label());
                    self.notifier.notify(resource, Alert::Recovered, &settings.notifications).await;
                }
            }
            Err(err) => {
                let message = err.to_string();
                let transition = FailureTracker::record_failure(resource);
                debug!(resource = %resource.id, failures = resource.failures, "Connectivity failed: {message}");
                self.record_failure(resource, FailureCategory::Connectivity, &message, now).await;

                if transition == Transition::WentDown {
                    warn!(resource = %resource.id, failures = resource.failures, "Proxy {} is down", resource.label());
                    self.notifier
                        .notify(resource, Alert::Down { error: message }, &settings.notifications)
                        .await;
                }
            }
        }
    }

    async fn apply_throughput(
        &self,
        resource: &mut ProxyResource,
        result: Result<SpeedMeasurement, ProbeError>,
        settings: &Settings,
        now: DateTime<Utc>,
    ) {
        let measurement = match result {
            Ok(measurement) => measurement,
            Err(err) => {
                debug!(resource = %resource.id, "Speed test failed: {err}");
                resource.download_mbps = 0.0;
                resource.upload_mbps = 0.0;
                self.record_failure(resource, FailureCategory::Throughput, &err.to_string(), now).await;
                return;
            }
        };

        resource.download_mbps = measurement.download_mbps;
        resource.upload_mbps = measurement.upload_mbps;

        let sample = SpeedSample {
            id: Uuid::new_v4(),
            resource_id: resource.id,
            timestamp: now,
            download_mbps: measurement.download_mbps,
            upload_mbps: measurement.upload_mbps,
        };
        if let Err(err) = self.store.append_speed_sample(&sample).await {
            warn!(resource = %resource.id, "Failed to store speed sample: {err:#}");
        }

        let threshold = settings.low_speed_threshold_mbps;
        if is_low_speed(measurement.download_mbps, threshold) {
            let alert = Alert::LowSpeed {
                download_mbps: measurement.download_mbps,
                upload_mbps: measurement.upload_mbps,
                threshold_mbps: threshold,
            };
            self.notifier.notify(resource, alert, &settings.notifications).await;
        }
    }

    async fn apply_egress(
        &self,
        resource: &mut ProxyResource,
        result: Result<EgressInfo, ProbeError>,
        settings: &Settings,
        now: DateTime<Utc>,
    ) {
        let egress = match result {
            Ok(egress) => egress,
            Err(err) => {
                debug!(resource = %resource.id, "Egress IP check failed: {err}");
                self.record_failure(resource, FailureCategory::EgressIp, &err.to_string(), now).await;
                return;
            }
        };

        let last = match self.store.last_ip_observation(resource.id).await {
            Ok(last) => last,
            Err(err) => {
                // Without history a comparison would misreport a first observation
                warn!(resource = %resource.id, "Failed to load IP history, skipping drift check: {err:#}");
                set_egress(resource, &egress);
                return;
            }
        };

        let drift = detect_drift(&egress.ip, now, last.as_ref(), settings.stuck_threshold());
        set_egress(resource, &egress);
        resource.stuck = drift.stuck;

        if drift.needs_log_entry() {
            let entry = IpObservation {
                id: Uuid::new_v4(),
                resource_id: resource.id,
                timestamp: now,
                ip: egress.ip.clone(),
                // First sighting records the configured proxy host as its predecessor
                previous_ip: drift.previous_ip.clone().or_else(|| Some(resource.address.host.clone())),
                country: egress.country.clone(),
                previous_country: last.as_ref().map(|l| l.country.clone()).unwrap_or_default(),
                isp: egress.operator.clone(),
                previous_isp: last.as_ref().map(|l| l.isp.clone()).unwrap_or_default(),
                stuck: false,
            };
            if let Err(err) = self.store.append_ip_observation(&entry).await {
                warn!(resource = %resource.id, "Failed to store IP observation: {err:#}");
            }
            resource.last_ip_change = Some(now);
        }

        if drift.changed {
            if let Some(previous_ip) = drift.previous_ip {
                info!(resource = %resource.id, "Egress IP changed {previous_ip} -> {}", egress.ip);
                let alert = Alert::IpChanged { previous_ip, new_ip: egress.ip.clone() };
                self.notifier.notify(resource, alert, &settings.notifications).await;
            }
        }

        if drift.stuck {
            let hours = last.as_ref().and_then(|l| stuck_alert_due(l.timestamp, now));
            debug!(resource = %resource.id, ip = %egress.ip, "Egress IP stuck");
            if let Some(hours) = hours {
                let alert = Alert::IpStuck { ip: egress.ip.clone(), hours };
                self.notifier.notify(resource, alert, &settings.notifications).await;
            }
        }
    }

    async fn record_failure(
        &self,
        resource: &ProxyResource,
        category: FailureCategory,
        message: &str,
        now: DateTime<Utc>,
    ) {
        let record = FailureRecord::new(resource, category, message, now);
        if let Err(err) = self.store.append_failure_record(&record).await {
            warn!(resource = %resource.id, %category, "Failed to store failure record: {err:#}");
        }
    }
}

fn set_egress(resource: &mut ProxyResource, egress: &EgressInfo) {
    resource.egress_ip = Some(egress.ip.clone());
    resource.egress_country = egress.country.clone();
    resource.operator = egress.operator.clone();
}

#[async_trait]
impl BatchRunner for CheckExecutor {
    async fn run_batch(&self, kind: CheckKind, token: CancellationToken) -> Result<BatchReport> {
        let settings = Arc::new(self.settings.snapshot().await);
        let resources = self.store.list_resources().await.context("failed to load proxies")?;
        info!(%kind, proxies = resources.len(), "Starting check batch");

        let executor = self.clone();
        let report = pool::run_batch(&token, resources, self.workers, move |resource| {
            let executor = executor.clone();
            let settings = settings.clone();
            async move { executor.check_resource(kind, resource, &settings).await.map(|_| ()) }
        })
        .await;

        info!(
            %kind,
            total = report.total,
            processed = report.processed,
            failed = report.failed,
            cancelled = report.cancelled,
            "Check batch finished"
        );
        Ok(report)
    }
}

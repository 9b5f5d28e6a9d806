use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use super::client::{ClientError, ClientFactory, ProxyClient};
use super::geoip::IspLookup;
use super::speed::{SpeedMeasurement, SpeedTester};
use crate::models::{CheckKind, ProxyResource};
use crate::settings::Settings;

/// Why a single probe step failed
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("proxy client unavailable: {0}")]
    ClientUnavailable(String),
    #[error(transparent)]
    Transport(#[from] ClientError),
    /// 403/407 from the proxy: bad credentials or not yet propagated
    #[error("proxy rejected the request with status {0}")]
    Rejected(u16),
    #[error("unexpected status {status} from {url}")]
    UnexpectedStatus { url: String, status: u16 },
    #[error("malformed egress IP response: {0}")]
    MalformedResponse(String),
}

/// Which steps a probe runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbePlan {
    pub connectivity: bool,
    pub throughput: bool,
    /// Only runs when connectivity ran and passed
    pub egress: bool,
}

impl ProbePlan {
    pub fn for_kind(kind: CheckKind, settings: &Settings, resource: &ProxyResource) -> Self {
        match kind {
            CheckKind::Liveness => Self { connectivity: true, throughput: false, egress: true },
            CheckKind::Throughput => Self {
                connectivity: false,
                throughput: settings.throughput_enabled() && !resource.is_dead(),
                egress: false,
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        !(self.connectivity || self.throughput || self.egress)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connectivity {
    pub latency_ms: u64,
    pub status: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EgressInfo {
    pub ip: String,
    pub country: String,
    /// Empty when the ISP lookup failed or knows nothing
    pub operator: String,
}

/// Per-step results of one probe. `None` means the step did not run.
#[derive(Debug)]
pub struct ProbeOutcome {
    pub checked_at: DateTime<Utc>,
    pub connectivity: Option<Result<Connectivity, ProbeError>>,
    pub throughput: Option<Result<SpeedMeasurement, ProbeError>>,
    pub egress: Option<Result<EgressInfo, ProbeError>>,
}

impl ProbeOutcome {
    fn new(checked_at: DateTime<Utc>) -> Self {
        Self { checked_at, connectivity: None, throughput: None, egress: None }
    }

    pub fn connectivity_passed(&self) -> bool {
        matches!(self.connectivity, Some(Ok(_)))
    }
}

#[derive(Debug, Deserialize)]
struct EgressResponse {
    ip: String,
    #[serde(default)]
    country: String,
}

/// Runs the network half of a check against a single proxy.
///
/// Nothing is persisted or logged as a result here; the caller owns that.
#[derive(Clone)]
pub struct Prober {
    clients: Arc<dyn ClientFactory>,
    speed: Arc<dyn SpeedTester>,
    isp: Arc<dyn IspLookup>,
}

impl Prober {
    pub fn new(
        clients: Arc<dyn ClientFactory>,
        speed: Arc<dyn SpeedTester>,
        isp: Arc<dyn IspLookup>,
    ) -> Self {
        Self { clients, speed, isp }
    }

    pub async fn probe(
        &self,
        resource: &ProxyResource,
        settings: &Settings,
        plan: ProbePlan,
    ) -> ProbeOutcome {
        let mut outcome = ProbeOutcome::new(Utc::now());
        if plan.is_empty() {
            return outcome;
        }

        let client = match self.clients.new_client(resource, settings) {
            Ok(client) => client,
            Err(err) => {
                let message = err.to_string();
                if plan.connectivity {
                    outcome.connectivity = Some(Err(ProbeError::ClientUnavailable(message.clone())));
                }
                if plan.throughput {
                    outcome.throughput = Some(Err(ProbeError::ClientUnavailable(message)));
                }
                return outcome;
            }
        };

        if plan.connectivity {
            outcome.connectivity = Some(self.check_connectivity(client.as_ref(), settings).await);
        }

        if plan.throughput {
            outcome.throughput = Some(self.measure_throughput(client.as_ref(), settings).await);
        }

        if plan.egress && outcome.connectivity_passed() {
            outcome.egress = Some(self.lookup_egress(client.as_ref(), settings).await);
        }

        outcome
    }

    async fn check_connectivity(
        &self,
        client: &dyn ProxyClient,
        settings: &Settings,
    ) -> Result<Connectivity, ProbeError> {
        let start = Instant::now();
        let status = client.status(&settings.health_check_url).await?;
        let latency_ms = start.elapsed().as_millis() as u64;

        match status {
            403 | 407 => Err(ProbeError::Rejected(status)),
            _ => Ok(Connectivity { latency_ms, status }),
        }
    }

    async fn measure_throughput(
        &self,
        client: &dyn ProxyClient,
        settings: &Settings,
    ) -> Result<SpeedMeasurement, ProbeError> {
        let first = self.speed.measure(client, settings).await?;
        if !first.is_zero() {
            return Ok(first);
        }

        debug!(download = first.download_mbps, upload = first.upload_mbps, "Zero speed, retrying once");
        self.speed.measure(client, settings).await
    }

    async fn lookup_egress(
        &self,
        client: &dyn ProxyClient,
        settings: &Settings,
    ) -> Result<EgressInfo, ProbeError> {
        let response = client.get_bytes(&settings.egress_ip_url, settings.timeout()).await?;
        if !response.is_success() {
            return Err(ProbeError::UnexpectedStatus {
                url: settings.egress_ip_url.clone(),
                status: response.status,
            });
        }

        let body: EgressResponse = serde_json::from_slice(&response.body)
            .map_err(|e| ProbeError::MalformedResponse(e.to_string()))?;
        let ip: IpAddr = body
            .ip
            .trim()
            .parse()
            .map_err(|_| ProbeError::MalformedResponse(format!("not an IP address: {}", body.ip)))?;

        let operator = match self.isp.lookup_isp(ip) {
            Ok(operator) => operator,
            Err(err) => {
                warn!(%ip, "ISP lookup failed: {err}");
                String::new()
            }
        };

        Ok(EgressInfo { ip: ip.to_string(), country: body.country, operator })
    }
}

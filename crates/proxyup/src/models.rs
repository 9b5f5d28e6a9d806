use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A resource is dead once its consecutive failure count goes above this.
pub const DEAD_AFTER_FAILURES: u32 = 2;

/// Alive/dead classification of a proxy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    #[default]
    Alive,
    Dead,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Alive => "alive",
            HealthStatus::Dead => "dead",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HealthStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "alive" => Ok(HealthStatus::Alive),
            "dead" => Ok(HealthStatus::Dead),
            other => Err(format!("unknown health status: {other}")),
        }
    }
}

#[derive(Debug, Error)]
pub enum AddressError {
    #[error("invalid proxy host {host:?}: {source}")]
    InvalidHost {
        host: String,
        #[source]
        source: url::ParseError,
    },
    #[error("proxy port must not be 0")]
    ZeroPort,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Where a proxy listens and how to authenticate against it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyAddress {
    pub host: String,
    pub port: u16,
    pub credentials: Option<Credentials>,
}

impl ProxyAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self { host: host.into(), port, credentials: None }
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials =
            Some(Credentials { username: username.into(), password: password.into() });
        self
    }

    pub fn validate(&self) -> Result<(), AddressError> {
        if self.port == 0 {
            return Err(AddressError::ZeroPort);
        }
        url::Url::parse(&self.proxy_url())
            .map_err(|source| AddressError::InvalidHost { host: self.host.clone(), source })?;
        Ok(())
    }

    /// URL handed to the HTTP client. Credentials travel separately as basic auth.
    pub fn proxy_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl fmt::Display for ProxyAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.credentials {
            Some(creds) => write!(f, "{}:***@{}:{}", creds.username, self.host, self.port),
            None => write!(f, "{}:{}", self.host, self.port),
        }
    }
}

/// A monitored proxy together with its last known health
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProxyResource {
    pub id: Uuid,
    pub address: ProxyAddress,

    pub name: String,
    pub contact: String,
    pub tag: String,

    /// Round trip of the last successful connectivity check
    pub latency_ms: u64,
    pub status: HealthStatus,
    /// Consecutive connectivity failures
    pub failures: u32,
    /// Last successful connectivity check
    pub last_check: Option<DateTime<Utc>>,
    pub uptime_minutes: u64,

    pub download_mbps: f64,
    pub upload_mbps: f64,

    pub egress_ip: Option<String>,
    pub egress_country: String,
    pub operator: String,
    pub stuck: bool,
    pub last_ip_change: Option<DateTime<Utc>>,
}

impl ProxyResource {
    pub fn new(address: ProxyAddress) -> Self {
        Self {
            id: Uuid::new_v4(),
            address,
            name: String::new(),
            contact: String::new(),
            tag: String::new(),
            latency_ms: 0,
            status: HealthStatus::Alive,
            failures: 0,
            last_check: None,
            uptime_minutes: 0,
            download_mbps: 0.0,
            upload_mbps: 0.0,
            egress_ip: None,
            egress_country: String::new(),
            operator: String::new(),
            stuck: false,
            last_ip_change: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn is_dead(&self) -> bool {
        self.status == HealthStatus::Dead
    }

    /// Name for log lines and alert messages
    pub fn label(&self) -> String {
        if self.name.is_empty() { self.address.to_string() } else { self.name.clone() }
    }
}

/// The two independently scheduled check kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckKind {
    /// Connectivity plus egress IP
    Liveness,
    Throughput,
}

impl CheckKind {
    /// Columns a batch of this kind is allowed to write back
    pub fn fields(&self) -> ProbeFields {
        match self {
            CheckKind::Liveness => ProbeFields::Liveness,
            CheckKind::Throughput => ProbeFields::Throughput,
        }
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckKind::Liveness => write!(f, "liveness"),
            CheckKind::Throughput => write!(f, "throughput"),
        }
    }
}

impl FromStr for CheckKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "liveness" => Ok(CheckKind::Liveness),
            "throughput" => Ok(CheckKind::Throughput),
            other => Err(format!("unknown check kind: {other}")),
        }
    }
}

/// Group of probe-owned columns written by a save.
///
/// Liveness and throughput batches run on separate timers and may hold
/// snapshots of the same resource at once, so each only writes its own group.
/// Identity and metadata are never written by the probe pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeFields {
    Liveness,
    Throughput,
    All,
}

impl ProbeFields {
    pub fn includes_liveness(&self) -> bool {
        matches!(self, ProbeFields::Liveness | ProbeFields::All)
    }

    pub fn includes_throughput(&self) -> bool {
        matches!(self, ProbeFields::Throughput | ProbeFields::All)
    }

    /// Copy the selected group from `source` onto `target`.
    pub fn copy(&self, source: &ProxyResource, target: &mut ProxyResource) {
        if self.includes_liveness() {
            target.latency_ms = source.latency_ms;
            target.status = source.status;
            target.failures = source.failures;
            target.last_check = source.last_check;
            target.uptime_minutes = source.uptime_minutes;
            target.egress_ip = source.egress_ip.clone();
            target.egress_country = source.egress_country.clone();
            target.operator = source.operator.clone();
            target.stuck = source.stuck;
            target.last_ip_change = source.last_ip_change;
        }
        if self.includes_throughput() {
            target.download_mbps = source.download_mbps;
            target.upload_mbps = source.upload_mbps;
        }
    }
}

/// Append-only egress IP history entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpObservation {
    pub id: Uuid,
    pub resource_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub ip: String,
    pub previous_ip: Option<String>,
    pub country: String,
    pub previous_country: String,
    pub isp: String,
    pub previous_isp: String,
    pub stuck: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    Connectivity,
    Throughput,
    EgressIp,
}

impl FailureCategory {
    pub const ALL: [FailureCategory; 3] =
        [FailureCategory::Connectivity, FailureCategory::Throughput, FailureCategory::EgressIp];

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::Connectivity => "connectivity",
            FailureCategory::Throughput => "throughput",
            FailureCategory::EgressIp => "egress_ip",
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FailureCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown failure category: {s}"))
    }
}

/// Append-only record of a single failed probe step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub id: Uuid,
    pub resource_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub category: FailureCategory,
    pub message: String,
    /// Latency known at the time of failure
    pub latency_ms: u64,
}

impl FailureRecord {
    pub fn new(
        resource: &ProxyResource,
        category: FailureCategory,
        message: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            resource_id: resource.id,
            timestamp,
            category,
            message: message.into(),
            latency_ms: resource.latency_ms,
        }
    }
}

/// Append-only throughput history entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedSample {
    pub id: Uuid,
    pub resource_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub download_mbps: f64,
    pub upload_mbps: f64,
}

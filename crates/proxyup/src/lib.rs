//! Health checking for a pool of outbound proxies.
//!
//! Two independent schedulers (liveness with egress-IP tracking, and
//! throughput) periodically fan the stored proxy set out to a bounded worker
//! pool. Each worker probes one proxy, classifies egress-IP drift, updates the
//! alive/dead state machine, raises alerts on transition edges and writes the
//! result back through a [`store::ResourceStore`].

pub mod models;
pub mod monitoring;
pub mod notification;
pub mod settings;
pub mod store;

pub use models::{
    AddressError, CheckKind, Credentials, FailureCategory, FailureRecord, HealthStatus, IpObservation,
    ProbeFields, ProxyAddress, ProxyResource, SpeedSample,
};
pub use settings::{NotificationSettings, Settings, SettingsError, SettingsHandle};
pub use store::ResourceStore;

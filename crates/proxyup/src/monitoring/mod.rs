//! Check engine: probing, classification, the worker pool and the schedulers.

pub mod checker;
pub mod client;
pub mod drift;
pub mod executor;
pub mod failure;
pub mod geoip;
pub mod pool;
pub mod scheduler;
pub mod speed;

pub use checker::{ProbeError, ProbeOutcome, ProbePlan, Prober};
pub use client::{ClientError, ClientFactory, ProxyClient, ReqwestClientFactory};
pub use drift::{DriftResult, detect_drift};
pub use executor::{BatchRunner, CheckExecutor};
pub use failure::{FailureStats, FailureTracker, Transition};
pub use geoip::{DisabledIsp, IspLookup, MaxMindIsp};
pub use pool::{BatchReport, MAX_CONCURRENT_WORKERS, run_batch};
pub use scheduler::{CheckScheduler, RunState};
pub use speed::{HttpSpeedTester, SpeedMeasurement, SpeedTester};

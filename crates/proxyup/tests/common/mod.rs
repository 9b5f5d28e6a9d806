#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use proxyup::ProxyResource;
use proxyup::monitoring::client::ClientResponse;
use proxyup::monitoring::{
    ClientError, ClientFactory, DisabledIsp, ProbeError, Prober, ProxyClient, SpeedMeasurement,
    SpeedTester,
};
use proxyup::notification::{NotificationSink, NotifyError};
use proxyup::settings::Settings;

/// How a scripted proxy behaves
#[derive(Debug, Clone)]
pub enum Behavior {
    Unreachable,
    Status(u16),
    StableIp(&'static str),
    /// A new egress IP on every lookup
    RotatingIp,
}

pub struct ScriptedClient {
    behavior: Behavior,
    lookups: AtomicUsize,
}

#[async_trait]
impl ProxyClient for ScriptedClient {
    async fn status(&self, _url: &str) -> Result<u16, ClientError> {
        match self.behavior {
            Behavior::Unreachable => Err(ClientError::Transport("connection refused".into())),
            Behavior::Status(code) => Ok(code),
            _ => Ok(200),
        }
    }

    async fn get_bytes(&self, _url: &str, _timeout: Duration) -> Result<ClientResponse, ClientError> {
        let n = self.lookups.fetch_add(1, Ordering::SeqCst) + 1;
        let ip = match self.behavior {
            Behavior::StableIp(ip) => ip.to_string(),
            Behavior::RotatingIp => format!("203.0.113.{n}"),
            _ => "192.0.2.1".to_string(),
        };
        let body = format!(r#"{{"ip":"{ip}","country":"Netherlands","cc":"NL"}}"#);
        Ok(ClientResponse { status: 200, body: body.into_bytes() })
    }

    async fn post_bytes(
        &self,
        _url: &str,
        _body: Vec<u8>,
        _timeout: Duration,
    ) -> Result<ClientResponse, ClientError> {
        Ok(ClientResponse { status: 200, body: Vec::new() })
    }
}

/// Hands out one long-lived scripted client per proxy host
#[derive(Default)]
pub struct ScriptedFactory {
    clients: Mutex<HashMap<String, Arc<ScriptedClient>>>,
}

impl ScriptedFactory {
    pub fn with(self, host: &str, behavior: Behavior) -> Self {
        self.clients
            .lock()
            .unwrap()
            .insert(host.to_string(), Arc::new(ScriptedClient { behavior, lookups: AtomicUsize::new(0) }));
        self
    }
}

impl ClientFactory for ScriptedFactory {
    fn new_client(
        &self,
        resource: &ProxyResource,
        _settings: &Settings,
    ) -> Result<Arc<dyn ProxyClient>, ClientError> {
        let clients = self.clients.lock().unwrap();
        match clients.get(&resource.address.host) {
            Some(client) => Ok(client.clone()),
            None => Err(ClientError::Transport(format!("no script for {}", resource.address.host))),
        }
    }
}

/// Returns the same measurement every time; `None` makes every measurement fail
#[derive(Default)]
pub struct ScriptedSpeed {
    result: Option<SpeedMeasurement>,
    pub calls: AtomicUsize,
}

impl ScriptedSpeed {
    pub fn returning(result: Option<SpeedMeasurement>) -> Self {
        Self { result, calls: AtomicUsize::new(0) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeedTester for ScriptedSpeed {
    async fn measure(
        &self,
        _client: &dyn ProxyClient,
        _settings: &Settings,
    ) -> Result<SpeedMeasurement, ProbeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.ok_or(ProbeError::Transport(ClientError::Timeout))
    }
}

#[derive(Default)]
pub struct RecordingSink {
    messages: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    /// Messages starting with `title` that mention `host`
    pub fn count(&self, title: &str, host: &str) -> usize {
        self.messages().iter().filter(|m| m.contains(title) && m.contains(host)).count()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn send(&self, message: &str) -> Result<(), NotifyError> {
        self.messages.lock().unwrap().push(message.to_string());
        Ok(())
    }
}

pub fn prober(factory: ScriptedFactory, speed: Arc<ScriptedSpeed>) -> Prober {
    Prober::new(Arc::new(factory), speed, Arc::new(DisabledIsp))
}

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::ProxyResource;
use crate::settings::Settings;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to build client for {address}: {source}")]
    Build {
        address: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("request timed out")]
    Timeout,
    #[error("request failed: {0}")]
    Transport(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() { ClientError::Timeout } else { ClientError::Transport(err.to_string()) }
    }
}

#[derive(Debug, Clone)]
pub struct ClientResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl ClientResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client whose traffic is tunnelled through one proxy
#[async_trait]
pub trait ProxyClient: Send + Sync {
    /// GET `url` and report the status code without reading the body
    async fn status(&self, url: &str) -> Result<u16, ClientError>;

    async fn get_bytes(&self, url: &str, timeout: Duration) -> Result<ClientResponse, ClientError>;

    async fn post_bytes(
        &self,
        url: &str,
        body: Vec<u8>,
        timeout: Duration,
    ) -> Result<ClientResponse, ClientError>;
}

pub trait ClientFactory: Send + Sync {
    fn new_client(
        &self,
        resource: &ProxyResource,
        settings: &Settings,
    ) -> Result<Arc<dyn ProxyClient>, ClientError>;
}

/// Builds a fresh [`reqwest::Client`] per proxy and per probe
#[derive(Debug, Clone, Copy, Default)]
pub struct ReqwestClientFactory;

impl ClientFactory for ReqwestClientFactory {
    fn new_client(
        &self,
        resource: &ProxyResource,
        settings: &Settings,
    ) -> Result<Arc<dyn ProxyClient>, ClientError> {
        let address = resource.address.to_string();
        let build_err = |source| ClientError::Build { address: address.clone(), source };

        let mut proxy = reqwest::Proxy::all(resource.address.proxy_url()).map_err(build_err)?;
        if let Some(creds) = &resource.address.credentials {
            proxy = proxy.basic_auth(&creds.username, &creds.password);
        }

        let client = reqwest::Client::builder()
            .proxy(proxy)
            .timeout(settings.timeout())
            .danger_accept_invalid_certs(settings.skip_tls_verify)
            .build()
            .map_err(build_err)?;

        Ok(Arc::new(ReqwestProxyClient { client }))
    }
}

pub struct ReqwestProxyClient {
    client: reqwest::Client,
}

#[async_trait]
impl ProxyClient for ReqwestProxyClient {
    async fn status(&self, url: &str) -> Result<u16, ClientError> {
        let response = self.client.get(url).send().await?;
        Ok(response.status().as_u16())
    }

    async fn get_bytes(&self, url: &str, timeout: Duration) -> Result<ClientResponse, ClientError> {
        let response = self.client.get(url).timeout(timeout).send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();
        Ok(ClientResponse { status, body })
    }

    async fn post_bytes(
        &self,
        url: &str,
        body: Vec<u8>,
        timeout: Duration,
    ) -> Result<ClientResponse, ClientError> {
        let response = self.client.post(url).timeout(timeout).body(body).send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();
        Ok(ClientResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProxyAddress;

    #[test]
    fn builds_client_with_credentials() {
        let resource = ProxyResource::new(
            ProxyAddress::new("127.0.0.1", 3128).with_credentials("user", "secret"),
        );
        assert!(ReqwestClientFactory.new_client(&resource, &Settings::default()).is_ok());
    }

    #[test]
    fn build_error_names_redacted_address() {
        let resource = ProxyResource::new(
            ProxyAddress::new("bad host", 3128).with_credentials("user", "secret"),
        );
        let err = match ReqwestClientFactory.new_client(&resource, &Settings::default()) {
            Err(err) => err.to_string(),
            Ok(_) => return,
        };
        assert!(!err.contains("secret"));
    }
}

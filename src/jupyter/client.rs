//! Jupyter gateway REST client

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HOST};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use super::channel::{KernelChannel, WsChannel};
use crate::config::GatewayConfig;
use crate::{Error, Result};

/// Handle to one remote kernel instance.
///
/// A handle has a single owner at any time: the idle queue, the execution
/// using it, or the task deleting it.
#[derive(Debug, PartialEq, Eq)]
pub struct Kernel {
    pub id: Uuid,
    /// Kernelspec name, e.g. `python3`.
    pub name: String,
    /// Peer address of the gateway node that created the kernel. Deletion
    /// goes back to this node.
    pub address: Option<SocketAddr>,
    /// WebSocket URL of the kernel channel, including the token.
    pub chan_url: String,
}

/// Kernel lifecycle operations offered by a gateway.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Start a kernel from the named kernelspec.
    async fn create_kernel(&self, name: &str) -> Result<Kernel>;

    /// Shut down and delete a kernel.
    async fn remove_kernel(&self, kernel: &Kernel) -> Result<()>;

    /// Fresh, unconnected channel to a kernel.
    fn channel(&self, kernel: &Kernel) -> Box<dyn KernelChannel>;
}

#[derive(Serialize)]
struct CreateKernel<'a> {
    name: &'a str,
}

#[derive(Deserialize)]
struct KernelModel {
    id: Uuid,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// HTTP client for a Jupyter server or kernel gateway.
#[derive(Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    base: Url,
    token: String,
}

impl fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayClient")
            .field("base", &self.base.as_str())
            .finish_non_exhaustive()
    }
}

impl GatewayClient {
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        let base = Url::parse(&config.address).map_err(|e| {
            Error::Config(format!("invalid gateway address {}: {}", config.address, e))
        })?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::Gateway(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base,
            token: config.token.clone(),
        })
    }

    /// WebSocket URL of a kernel's channel endpoint.
    ///
    /// The scheme follows the gateway's: `https` becomes `wss`, anything else
    /// becomes `ws`.
    pub fn channel_url(&self, id: &Uuid) -> Result<Url> {
        let mut url = join(&self.base, &format!("api/kernels/{}/channels", id));
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| Error::Config(format!("cannot derive {} URL from {}", scheme, self.base)))?;
        url.query_pairs_mut().append_pair("token", &self.token);
        Ok(url)
    }

    fn authorization(&self) -> String {
        format!("token {}", self.token)
    }

    /// Original authority of the gateway, sent as `Host` when a request is
    /// pinned to a peer address.
    fn authority(&self) -> String {
        let host = self.base.host_str().unwrap_or_default();
        match self.base.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        }
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|b| b.message)
            .unwrap_or(body);
        Err(Error::Gateway(format!("invalid server response ({}): {}", status, message)))
    }
}

#[async_trait]
impl Gateway for GatewayClient {
    async fn create_kernel(&self, name: &str) -> Result<Kernel> {
        let url = join(&self.base, "api/kernels");

        let response = self
            .http
            .post(url)
            .header(AUTHORIZATION, self.authorization())
            .json(&CreateKernel { name })
            .send()
            .await
            .map_err(|e| Error::Gateway(format!("failed to process request: {}", e)))?;

        let address = response.remote_addr();
        let model: KernelModel = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| Error::Gateway(format!("failed to parse response: {}", e)))?;

        let chan_url = self.channel_url(&model.id)?;

        Ok(Kernel {
            id: model.id,
            name: model.name.unwrap_or_else(|| name.to_string()),
            address,
            chan_url: chan_url.into(),
        })
    }

    async fn remove_kernel(&self, kernel: &Kernel) -> Result<()> {
        let mut base = self.base.clone();
        if let Some(addr) = kernel.address {
            base.set_ip_host(addr.ip())
                .and_then(|_| base.set_port(Some(addr.port())))
                .map_err(|_| Error::Gateway(format!("cannot address gateway node {}", addr)))?;
        }

        let mut request = self
            .http
            .delete(join(&base, &format!("api/kernels/{}", kernel.id)))
            .header(AUTHORIZATION, self.authorization());
        if kernel.address.is_some() {
            request = request.header(HOST, self.authority());
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Gateway(format!("failed to process request: {}", e)))?;
        Self::check(response).await?;
        Ok(())
    }

    fn channel(&self, kernel: &Kernel) -> Box<dyn KernelChannel> {
        Box::new(WsChannel::new(kernel.chan_url.clone()))
    }
}

/// Append `suffix` to the path of `base`, keeping any path prefix.
fn join(base: &Url, suffix: &str) -> Url {
    let mut url = base.clone();
    let path = format!(
        "{}/{}",
        base.path().trim_end_matches('/'),
        suffix.trim_start_matches('/')
    );
    url.set_path(&path);
    url.set_query(None);
    url
}

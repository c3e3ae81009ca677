//! Two-hop discovery of the OpenAI-compatible inference endpoint.
//!
//! The serving port's `/status` names the management port (`ports[1]`), and
//! the management port's `/status` names the OpenAI port
//! (`config.openai_port`). Each hop is cached once it succeeds; failures are
//! not cached, so the next call retries only the hop that failed. Callers
//! that arrive while a resolution is in flight wait for it instead of
//! issuing their own requests.

use std::fmt;
use std::time::Duration;

use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::api::{ManagementStatus, ServingStatus};
use crate::utils::url::construct_api_url;

const MANAGEMENT_PORT_INDEX: usize = 1;
const CHAT_COMPLETIONS_PATH: &str = "v1/chat/completions";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEndpoints {
    pub management_url: String,
    pub inference_url: String,
}

#[derive(Debug)]
pub enum ResolveError {
    InvalidHost(String),
    Request { url: String, source: reqwest::Error },
    Status { url: String, status: u16 },
    Body { url: String, source: reqwest::Error },
    MissingManagementPort { url: String, ports: Vec<u16> },
    TimedOut { url: String, limit: Duration },
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolveError::InvalidHost(host) => write!(f, "invalid server address '{host}'"),
            ResolveError::Request { url, source } => {
                write!(f, "failed to reach {url}: {source}")
            }
            ResolveError::Status { url, status } => {
                write!(f, "{url} responded with HTTP {status}")
            }
            ResolveError::Body { url, source } => {
                write!(f, "unexpected response from {url}: {source}")
            }
            ResolveError::MissingManagementPort { url, ports } => write!(
                f,
                "{url} did not list a management port (ports: {ports:?})"
            ),
            ResolveError::TimedOut { url, limit } => write!(
                f,
                "{url} did not respond within {} seconds",
                limit.as_secs_f64()
            ),
        }
    }
}

impl std::error::Error for ResolveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ResolveError::Request { source, .. } | ResolveError::Body { source, .. } => {
                Some(source)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
struct DiscoveryCache {
    management_url: Option<String>,
    resolved: Option<ResolvedEndpoints>,
}

pub struct EndpointResolver {
    client: Client,
    base_url: String,
    host: String,
    request_timeout: Option<Duration>,
    cache: Mutex<DiscoveryCache>,
}

impl EndpointResolver {
    /// `base_url` is the serving address, e.g. `http://localhost:8000`.
    pub fn new(client: Client, base_url: &str) -> Result<Self, ResolveError> {
        let parsed =
            Url::parse(base_url).map_err(|_| ResolveError::InvalidHost(base_url.to_string()))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| ResolveError::InvalidHost(base_url.to_string()))?
            .to_string();

        Ok(Self {
            client,
            base_url: base_url.to_string(),
            host,
            request_timeout: None,
            cache: Mutex::new(DiscoveryCache::default()),
        })
    }

    /// Bounds each discovery request, headers and body included.
    pub fn with_request_timeout(mut self, limit: Option<Duration>) -> Self {
        self.request_timeout = limit;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the cached endpoints without waiting or issuing requests.
    pub fn cached(&self) -> Option<ResolvedEndpoints> {
        self.cache
            .try_lock()
            .ok()
            .and_then(|cache| cache.resolved.clone())
    }

    pub async fn resolve(&self) -> Result<ResolvedEndpoints, ResolveError> {
        let mut cache = self.cache.lock().await;
        if let Some(resolved) = &cache.resolved {
            return Ok(resolved.clone());
        }

        let management_url = self.management_url_locked(&mut cache).await?;
        let inference_url = self.discover_inference_url(&management_url).await?;
        let resolved = ResolvedEndpoints {
            management_url,
            inference_url,
        };
        info!(
            management_url = %resolved.management_url,
            inference_url = %resolved.inference_url,
            "endpoints resolved"
        );
        cache.resolved = Some(resolved.clone());
        Ok(resolved)
    }

    /// Runs only the first hop, which is all the reader-group lookup needs.
    pub async fn management_url(&self) -> Result<String, ResolveError> {
        let mut cache = self.cache.lock().await;
        self.management_url_locked(&mut cache).await
    }

    async fn management_url_locked(
        &self,
        cache: &mut DiscoveryCache,
    ) -> Result<String, ResolveError> {
        if let Some(url) = &cache.management_url {
            return Ok(url.clone());
        }
        let url = self.discover_management_url().await?;
        cache.management_url = Some(url.clone());
        Ok(url)
    }

    async fn discover_management_url(&self) -> Result<String, ResolveError> {
        let status_url = construct_api_url(&self.base_url, "status");
        let status: ServingStatus = self.fetch_json(&status_url).await?;
        let port = status
            .ports
            .get(MANAGEMENT_PORT_INDEX)
            .copied()
            .ok_or_else(|| ResolveError::MissingManagementPort {
                url: status_url.clone(),
                ports: status.ports.clone(),
            })?;
        Ok(format!("http://{}:{port}", self.host))
    }

    async fn discover_inference_url(&self, management_url: &str) -> Result<String, ResolveError> {
        let status_url = construct_api_url(management_url, "status");
        let status: ManagementStatus = self.fetch_json(&status_url).await?;
        Ok(format!(
            "http://{}:{}/{CHAT_COMPLETIONS_PATH}",
            self.host, status.config.openai_port
        ))
    }

    async fn fetch_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, ResolveError> {
        debug!(%url, "discovery request");
        match self.request_timeout {
            Some(limit) => tokio::time::timeout(limit, self.fetch_json_unbounded(url))
                .await
                .map_err(|_| ResolveError::TimedOut {
                    url: url.to_string(),
                    limit,
                })?,
            None => self.fetch_json_unbounded(url).await,
        }
    }

    async fn fetch_json_unbounded<T: DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<T, ResolveError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| ResolveError::Request {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ResolveError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response.json::<T>().await.map_err(|source| ResolveError::Body {
            url: url.to_string(),
            source,
        })
    }
}

// HTTP client for the upstream application server
// Author: kelexine (https://github.com/kelexine)

use super::{forwardable_headers, Fetcher, ProxiedRequest};
use crate::cache::ResponseSnapshot;
use crate::config::UpstreamConfig;
use crate::error::{ProxyError, Result};
use async_trait::async_trait;
use reqwest::{redirect, Client};
use std::time::{Duration, Instant};
use tracing::debug;

/// Fetches requests from the application server over HTTP.
///
/// Redirects are handed back to the page untouched, and response bodies are
/// buffered whole so they can be both returned and stored.
#[derive(Clone)]
pub struct HttpUpstream {
    http_client: Client,
    origin: String,
}

impl HttpUpstream {
    /// Create a pooled client for the configured origin.
    pub fn new(config: &UpstreamConfig) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .connect_timeout(Duration::from_secs(config.connect_timeout_seconds))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .tcp_nodelay(true)
            .redirect(redirect::Policy::none())
            .use_rustls_tls()
            .build()
            .map_err(|e| ProxyError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        debug!("Created upstream client for {}", config.origin);

        Ok(Self {
            http_client,
            origin: config.origin.trim_end_matches('/').to_string(),
        })
    }

    /// Get the upstream origin
    pub fn origin(&self) -> &str {
        &self.origin
    }

    fn url_for(&self, request: &ProxiedRequest) -> String {
        format!("{}{}", self.origin, request.path_and_query)
    }
}

#[async_trait]
impl Fetcher for HttpUpstream {
    async fn fetch(&self, request: &ProxiedRequest) -> Result<ResponseSnapshot> {
        let url = self.url_for(request);
        let started = Instant::now();

        let response = self
            .http_client
            .request(request.method.clone(), &url)
            .headers(forwardable_headers(&request.headers))
            .body(request.body.clone())
            .send()
            .await
            .map_err(|e| ProxyError::UpstreamUnavailable(format!("{} {}: {}", request.method, url, e)))?;

        let status = response.status();
        let headers = forwardable_headers(response.headers());
        let body = response
            .bytes()
            .await
            .map_err(|e| ProxyError::UpstreamUnavailable(format!("reading body of {}: {}", url, e)))?;

        debug!(
            "{} {} -> {} ({} bytes, {}ms)",
            request.method,
            request.path_and_query,
            status.as_u16(),
            body.len(),
            started.elapsed().as_millis()
        );

        Ok(ResponseSnapshot::new(status, headers, body))
    }
}

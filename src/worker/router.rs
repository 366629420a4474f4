// Request router: classify intercepted requests and apply a caching strategy
// Author: kelexine (https://github.com/kelexine)

use super::ServiceWorker;
use crate::cache::{RequestKey, ResponseSnapshot};
use crate::config::RoutingConfig;
use crate::error::{ProxyError, Result};
use crate::metrics;
use crate::upstream::ProxiedRequest;
use std::time::Instant;
use tracing::{debug, warn};

/// Strategy family of an intercepted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    /// Network-first, cache fallback for reads.
    Api,
    /// Cache-first.
    Static,
    /// Network-first, falling back to the cached page and then the shell.
    Page,
}

impl RequestClass {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestClass::Api => "api",
            RequestClass::Static => "static",
            RequestClass::Page => "page",
        }
    }
}

/// Where the returned response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Network,
    Cache,
    /// The cached offline shell stood in for the requested page.
    Shell,
}

impl ResponseSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ResponseSource::Network => "network",
            ResponseSource::Cache => "cache",
            ResponseSource::Shell => "shell",
        }
    }
}

/// Result of routing one request.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub class: RequestClass,
    pub source: ResponseSource,
    pub response: ResponseSnapshot,
}

/// Classify by path prefix. The API prefix is checked first, then the
/// static prefix; everything else is a page.
pub fn classify(path: &str, routing: &RoutingConfig) -> RequestClass {
    if path.starts_with(&routing.api_prefix) {
        RequestClass::Api
    } else if path.starts_with(&routing.static_prefix) {
        RequestClass::Static
    } else {
        RequestClass::Page
    }
}

/// Why the page strategy is falling back.
enum PageMiss {
    Status(ResponseSnapshot),
    Rejected(ProxyError),
}

impl ServiceWorker {
    pub(crate) async fn on_fetch(&self, request: ProxiedRequest) -> Result<FetchOutcome> {
        let class = classify(request.path(), &self.settings.routing);
        let started = Instant::now();

        let result = match class {
            RequestClass::Api => self.network_first(&request).await,
            RequestClass::Static => self.cache_first(&request).await,
            RequestClass::Page => self.network_first_with_shell(&request).await,
        };

        let elapsed = started.elapsed().as_secs_f64();
        match result {
            Ok((response, source)) => {
                debug!(
                    "{} {} [{}] served from {} ({})",
                    request.method,
                    request.path_and_query,
                    class.as_str(),
                    source.as_str(),
                    response.status.as_u16()
                );
                metrics::record_fetch(class.as_str(), source.as_str(), elapsed);
                Ok(FetchOutcome {
                    class,
                    source,
                    response,
                })
            }
            Err(e) => {
                warn!(
                    "{} {} [{}] failed with no cached fallback: {}",
                    request.method,
                    request.path_and_query,
                    class.as_str(),
                    e
                );
                metrics::record_fetch_failure(class.as_str(), elapsed);
                Err(e)
            }
        }
    }

    /// API requests: fresh data first, cached reads only when offline.
    async fn network_first(&self, request: &ProxiedRequest) -> Result<(ResponseSnapshot, ResponseSource)> {
        let key = RequestKey::for_request(&request.method, &request.path_and_query);

        match self.fetcher.fetch(request).await {
            Ok(response) => {
                if let Some(key) = key {
                    if response.is_ok() {
                        self.store_behind(key, &response);
                    }
                }
                Ok((response, ResponseSource::Network))
            }
            Err(e) if e.is_network_failure() => {
                if let Some(key) = &key {
                    if let Some(cached) = self.lookup(key).await {
                        return Ok((cached, ResponseSource::Cache));
                    }
                }
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Static assets: immutable per version, so a hit skips the network.
    async fn cache_first(&self, request: &ProxiedRequest) -> Result<(ResponseSnapshot, ResponseSource)> {
        let key = RequestKey::for_request(&request.method, &request.path_and_query);

        if let Some(key) = &key {
            if let Some(cached) = self.lookup(key).await {
                return Ok((cached, ResponseSource::Cache));
            }
        }

        let response = self.fetcher.fetch(request).await?;
        if let Some(key) = key {
            if response.is_ok() {
                self.store_behind(key, &response);
            }
        }
        Ok((response, ResponseSource::Network))
    }

    /// Pages: latest content online, cached page or offline shell otherwise.
    ///
    /// An error status only falls back for reads; a failed form submission
    /// must reach the page as-is.
    async fn network_first_with_shell(
        &self,
        request: &ProxiedRequest,
    ) -> Result<(ResponseSnapshot, ResponseSource)> {
        let key = RequestKey::for_request(&request.method, &request.path_and_query);

        let miss = match self.fetcher.fetch(request).await {
            Ok(response) if response.is_ok() => {
                if let Some(key) = key {
                    self.store_behind(key, &response);
                }
                return Ok((response, ResponseSource::Network));
            }
            Ok(response) if key.is_none() => return Ok((response, ResponseSource::Network)),
            Ok(response) => PageMiss::Status(response),
            Err(e) if e.is_network_failure() => PageMiss::Rejected(e),
            Err(e) => return Err(e),
        };

        if let Some(key) = &key {
            if let Some(cached) = self.lookup(key).await {
                return Ok((cached, ResponseSource::Cache));
            }
        }

        let shell = RequestKey::get(&self.settings.routing.shell_path);
        if let Some(cached) = self.lookup(&shell).await {
            return Ok((cached, ResponseSource::Shell));
        }

        match miss {
            PageMiss::Status(response) => Ok((response, ResponseSource::Network)),
            PageMiss::Rejected(e) => Err(e),
        }
    }

    /// Read from this version's store. Storage errors count as a miss; they
    /// are logged and never reach the page.
    async fn lookup(&self, key: &RequestKey) -> Option<ResponseSnapshot> {
        match self.storage.match_key(&self.settings.version, key).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!("Cache lookup for {} failed: {}", key.url, e);
                None
            }
        }
    }

    /// Queue a copy of `response` for storage without waiting for it.
    fn store_behind(&self, key: RequestKey, response: &ResponseSnapshot) {
        self.writes
            .enqueue(&self.settings.version, key, response.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_classify_prefixes() {
        let routing = RoutingConfig::default();
        assert_eq!(classify("/api/notes", &routing), RequestClass::Api);
        assert_eq!(classify("/static/style.css", &routing), RequestClass::Static);
        assert_eq!(classify("/notes/42", &routing), RequestClass::Page);
        assert_eq!(classify("/", &routing), RequestClass::Page);
        // Prefix match includes the trailing slash
        assert_eq!(classify("/api", &routing), RequestClass::Page);
        assert_eq!(classify("/staticfoo", &routing), RequestClass::Page);
    }

    #[test]
    fn test_api_prefix_checked_first() {
        let routing = RoutingConfig {
            api_prefix: "/static/api/".to_string(),
            ..RoutingConfig::default()
        };
        assert_eq!(classify("/static/api/notes", &routing), RequestClass::Api);
        assert_eq!(classify("/static/app.js", &routing), RequestClass::Static);
    }

    proptest! {
        #[test]
        fn prop_classification_follows_prefix(rest in "[a-z0-9/._-]{0,24}") {
            let routing = RoutingConfig::default();
            prop_assert_eq!(classify(&format!("/api/{}", rest), &routing), RequestClass::Api);
            prop_assert_eq!(classify(&format!("/static/{}", rest), &routing), RequestClass::Static);
            prop_assert_eq!(classify(&format!("/notes/{}", rest), &routing), RequestClass::Page);
        }
    }
}

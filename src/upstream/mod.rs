// Upstream fetch module: the network side of every strategy
// Author: kelexine (https://github.com/kelexine)

mod client;

pub use client::HttpUpstream;

use crate::cache::ResponseSnapshot;
use crate::error::Result;
use async_trait::async_trait;
use axum::http::{header, HeaderMap, HeaderName, Method};
use bytes::Bytes;

/// A request the page issued, buffered so it can be replayed against the
/// upstream and used as a cache key.
#[derive(Debug, Clone)]
pub struct ProxiedRequest {
    pub method: Method,
    /// Path and query, always starting with `/`.
    pub path_and_query: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ProxiedRequest {
    /// A bodiless `GET` of `path`, as issued when installing assets.
    pub fn get(path: &str) -> Self {
        Self {
            method: Method::GET,
            path_and_query: path.to_string(),
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// The path without its query string.
    pub fn path(&self) -> &str {
        self.path_and_query
            .split_once('?')
            .map_or(self.path_and_query.as_str(), |(path, _)| path)
    }
}

/// Issues requests against the application server.
///
/// `Err` means the fetch itself was rejected (offline, DNS failure, timeout).
/// Any HTTP status, including errors, is a resolved `Ok` response.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &ProxiedRequest) -> Result<ResponseSnapshot>;
}

/// Hop-by-hop headers plus those the HTTP stack recomputes per connection.
static HOP_BY_HOP: [HeaderName; 9] = [
    header::CONNECTION,
    header::HOST,
    header::CONTENT_LENGTH,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Copy `headers`, dropping those that must not cross the proxy.
pub fn forwardable_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if HOP_BY_HOP.contains(name) || name.as_str() == "keep-alive" {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_path_strips_query() {
        let mut req = ProxiedRequest::get("/api/notes?tag=rust");
        assert_eq!(req.path(), "/api/notes");
        req.path_and_query = "/".to_string();
        assert_eq!(req.path(), "/");
    }

    #[test]
    fn test_hop_by_hop_headers_dropped() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(header::HOST, HeaderValue::from_static("localhost:8080"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.append(header::SET_COOKIE, HeaderValue::from_static("a=1"));
        headers.append(header::SET_COOKIE, HeaderValue::from_static("b=2"));

        let out = forwardable_headers(&headers);
        assert!(out.get(header::CONNECTION).is_none());
        assert!(out.get(header::HOST).is_none());
        assert!(out.get("keep-alive").is_none());
        assert_eq!(out[header::CONTENT_TYPE], "application/json");
        assert_eq!(out.get_all(header::SET_COOKIE).iter().count(), 2);
    }
}

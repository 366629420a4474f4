//! Cache keys, response snapshots and their on-disk form.

// Author: kelexine (https://github.com/kelexine)

use crate::error::{ProxyError, Result};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const MANIFEST_METHOD: &str = "MANIFEST";

/// Identity of a cached request: method plus same-origin path-and-query.
///
/// Only `GET` requests can be matched or stored, so a key is never built
/// for any other method.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestKey {
    pub method: String,
    pub url: String,
}

impl RequestKey {
    /// Build the key for a request, or `None` when the method is not cacheable.
    pub fn for_request(method: &Method, url: &str) -> Option<Self> {
        if *method == Method::GET {
            Some(Self::get(url))
        } else {
            None
        }
    }

    /// Key for a `GET` of the given path.
    pub fn get(url: &str) -> Self {
        Self {
            method: Method::GET.to_string(),
            url: url.to_string(),
        }
    }

    /// Reserved key under which an install records its asset list. The
    /// method is not an HTTP method, so no request can ever match it.
    pub fn manifest() -> Self {
        Self {
            method: MANIFEST_METHOD.to_string(),
            url: "static-assets".to_string(),
        }
    }

    /// Stable SHA-256 digest of the key, used as a file name by the disk backend.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.method.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.url.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// A fully buffered response: status, headers and body.
///
/// Cloning is cheap; the body is reference counted.
#[derive(Debug, Clone)]
pub struct ResponseSnapshot {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ResponseSnapshot {
    pub fn new(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    /// Status in the 200-299 range.
    pub fn is_ok(&self) -> bool {
        self.status.is_success()
    }
}

/// Serialized form of one cache entry.
#[derive(Debug, Serialize, Deserialize)]
pub struct StoredEntry {
    pub key: RequestKey,
    pub status: u16,
    /// Header names with base64 of the raw value bytes.
    pub headers: Vec<(String, String)>,
    /// Base64 of the body bytes.
    pub body: String,
    pub stored_at: DateTime<Utc>,
}

impl StoredEntry {
    pub fn from_snapshot(key: &RequestKey, response: &ResponseSnapshot) -> Self {
        let headers = response
            .headers
            .iter()
            .map(|(name, value)| (name.as_str().to_string(), BASE64.encode(value.as_bytes())))
            .collect();

        Self {
            key: key.clone(),
            status: response.status.as_u16(),
            headers,
            body: BASE64.encode(&response.body),
            stored_at: Utc::now(),
        }
    }

    pub fn into_snapshot(self) -> Result<(RequestKey, ResponseSnapshot)> {
        let status = StatusCode::from_u16(self.status)
            .map_err(|e| ProxyError::Storage(format!("invalid stored status: {}", e)))?;

        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in self.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ProxyError::Storage(format!("invalid stored header: {}", e)))?;
            let value = BASE64
                .decode(value.as_bytes())
                .map_err(|e| ProxyError::Storage(format!("invalid stored header: {}", e)))?;
            let value = HeaderValue::from_bytes(&value)
                .map_err(|e| ProxyError::Storage(format!("invalid stored header: {}", e)))?;
            headers.append(name, value);
        }

        let body = BASE64
            .decode(self.body.as_bytes())
            .map_err(|e| ProxyError::Storage(format!("invalid stored body: {}", e)))?;

        Ok((self.key, ResponseSnapshot::new(status, headers, body)))
    }
}

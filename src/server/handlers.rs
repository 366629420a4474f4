// HTTP request handlers
// Author: kelexine (https://github.com/kelexine)

use super::middleware::SOURCE_HEADER;
use super::routes::AppState;
use crate::error::ProxyError;
use crate::upstream::ProxiedRequest;
use crate::worker::{FetchOutcome, RegistrationStatus, SyncOutcome, WorkerSettings, WriteStats};
use axum::{
    body::Body,
    extract::{Path, Request, State},
    http::{header, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info};

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub checks: HashMap<String, HealthCheck>,
    pub timestamp: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: String,
    pub message: String,
}

pub async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let mut checks = HashMap::new();
    let mut overall_status = HealthStatus::Healthy;
    let registration = &state.registration;
    let configured = state.config.cache.version.as_str();

    // Check which version controls requests
    let controller_check = match registration.controller() {
        Some(controller) if controller.version() == configured => HealthCheck {
            status: "ok".to_string(),
            message: format!("Controlled by {}", controller.version()),
        },
        Some(controller) => {
            overall_status = HealthStatus::Degraded;
            HealthCheck {
                status: "warning".to_string(),
                message: format!(
                    "Controlled by {} while {} is not yet active",
                    controller.version(),
                    configured
                ),
            }
        }
        None => {
            overall_status = HealthStatus::Unhealthy;
            HealthCheck {
                status: "error".to_string(),
                message: "No version installed; requests pass through uncached".to_string(),
            }
        }
    };
    checks.insert("controller".to_string(), controller_check);

    // Check the write-behind queue
    let stats = registration.write_behind().stats();
    let writes_check = if stats.failed > 0 || stats.dropped > 0 {
        if matches!(overall_status, HealthStatus::Healthy) {
            overall_status = HealthStatus::Degraded;
        }
        HealthCheck {
            status: "warning".to_string(),
            message: format!(
                "{} cache writes failed, {} dropped",
                stats.failed, stats.dropped
            ),
        }
    } else {
        HealthCheck {
            status: "ok".to_string(),
            message: format!("{} cache writes stored", stats.stored),
        }
    };
    checks.insert("cache_writes".to_string(), writes_check);

    // Check configuration
    let config_check = HealthCheck {
        status: "ok".to_string(),
        message: format!("Upstream: {}", state.config.upstream.origin),
    };
    checks.insert("configuration".to_string(), config_check);

    Json(HealthResponse {
        status: overall_status,
        checks,
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: String,
    pub registration: RegistrationStatus,
    pub stores: Vec<String>,
    pub writes: WriteStats,
}

/// Handler for /__worker/status
pub async fn status_handler(
    State(state): State<AppState>,
) -> Result<Json<StatusResponse>, ProxyError> {
    let registration = &state.registration;
    let stores = registration.storage().keys().await?;

    Ok(Json(StatusResponse {
        version: state.config.cache.version.clone(),
        registration: registration.status(),
        stores,
        writes: registration.write_behind().stats(),
    }))
}

/// Handler for /__worker/metrics (Prometheus text format)
pub async fn metrics_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        crate::metrics::gather_metrics(),
    )
}

#[derive(Debug, Serialize)]
pub struct SyncResponse {
    pub tag: String,
    pub handled: bool,
}

/// Handler for /__worker/sync/:tag
pub async fn sync_handler(
    State(state): State<AppState>,
    Path(tag): Path<String>,
) -> Result<Json<SyncResponse>, ProxyError> {
    let outcome = state.registration.handle_sync(&tag).await?;

    Ok(Json(SyncResponse {
        tag,
        handled: outcome == SyncOutcome::Synced,
    }))
}

/// Handler for /__worker/update: install the configured version again, as
/// the platform does when it re-checks the worker script.
pub async fn update_handler(
    State(state): State<AppState>,
) -> Result<Json<RegistrationStatus>, ProxyError> {
    let settings = WorkerSettings::from_config(&state.config);
    info!("Update requested for {}", settings.version);

    state.registration.update(settings).await?;
    Ok(Json(state.registration.status()))
}

/// Handler for /__worker/skip-waiting: promote a waiting version.
pub async fn skip_waiting_handler(State(state): State<AppState>) -> Json<RegistrationStatus> {
    if !state.registration.skip_waiting().await {
        debug!("Skip-waiting requested with no waiting version");
    }
    Json(state.registration.status())
}

/// Fallback handler: every other request is a fetch event.
pub async fn proxy_handler(
    State(state): State<AppState>,
    request: Request,
) -> Result<Response, ProxyError> {
    let (parts, body) = request.into_parts();

    let body = axum::body::to_bytes(body, state.config.server.max_body_bytes)
        .await
        .map_err(|e| ProxyError::InvalidRequest(format!("Failed to read request body: {}", e)))?;

    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| parts.uri.path().to_string());

    let outcome = state
        .registration
        .handle_fetch(ProxiedRequest {
            method: parts.method,
            path_and_query,
            headers: parts.headers,
            body,
        })
        .await?;

    Ok(into_http_response(outcome))
}

/// Turn a routed response back into an HTTP response, body untouched.
fn into_http_response(outcome: FetchOutcome) -> Response {
    let snapshot = outcome.response;

    let mut response = Response::new(Body::from(snapshot.body));
    *response.status_mut() = snapshot.status;
    *response.headers_mut() = snapshot.headers;
    response.headers_mut().insert(
        SOURCE_HEADER.clone(),
        HeaderValue::from_static(outcome.source.as_str()),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ResponseSnapshot;
    use crate::worker::{RequestClass, ResponseSource};
    use axum::http::{HeaderMap, StatusCode};

    #[test]
    fn test_response_keeps_status_headers_and_body() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/html"));

        let response = into_http_response(FetchOutcome {
            class: RequestClass::Page,
            source: ResponseSource::Shell,
            response: ResponseSnapshot::new(StatusCode::OK, headers, "<html></html>"),
        });

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "text/html");
        assert_eq!(response.headers()[&SOURCE_HEADER], "shell");
    }
}

// HTTP routes configuration
// Author: kelexine (https://github.com/kelexine)

use super::handlers::{
    health_handler, metrics_handler, proxy_handler, skip_waiting_handler, status_handler,
    sync_handler, update_handler,
};
use super::middleware::request_id_layers;
use crate::config::AppConfig;
use crate::error::Result;
use crate::worker::Registration;
use axum::{routing::{get, post}, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub registration: Arc<Registration>,
}

pub fn create_router(config: AppConfig, registration: Arc<Registration>) -> Result<Router> {
    let body_limit = config.server.max_body_bytes;
    let state = AppState {
        config,
        registration,
    };

    let (set_request_id, propagate_request_id) = request_id_layers();

    let app = Router::new()
        .route("/__worker/health", get(health_handler))
        .route("/__worker/status", get(status_handler))
        .route("/__worker/metrics", get(metrics_handler))
        .route("/__worker/sync/:tag", post(sync_handler))
        .route("/__worker/update", post(update_handler))
        .route("/__worker/skip-waiting", post(skip_waiting_handler))
        .fallback(proxy_handler)
        .layer(tower_http::limit::RequestBodyLimitLayer::new(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(propagate_request_id)
        .layer(set_request_id)
        .with_state(state);

    Ok(app)
}

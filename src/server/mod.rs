//! Axum-based HTTP front for the offline cache worker.
//!
//! Every request that does not hit an admin route becomes a fetch event on
//! the controlling worker, which answers from the network or from its cache
//! store. Admin routes live under `/__worker/` so they never collide with
//! the app's own paths.
//!
//! # Components
//!
//! - `handlers`: the proxy fallback plus health, status, metrics, sync and
//!   update endpoints.
//! - `middleware`: request ID tracking.
//! - `routes`: the router that ties everything together.
//!
//! Author: kelexine (<https://github.com/kelexine>)

mod handlers;
mod middleware;
mod routes;

pub use routes::{create_router, AppState};

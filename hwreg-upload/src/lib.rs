//! hwreg-upload library interface
//!
//! Device identity upload engine: reads identity records, skips devices the
//! registry already knows, submits the rest and polls each import until it
//! resolves. Exposed as a library for integration testing and embedding.

pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod services;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use hwreg_common::events::EventBus;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::services::UploadSupervisor;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub supervisor: Arc<UploadSupervisor>,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(supervisor: Arc<UploadSupervisor>, event_bus: EventBus) -> Self {
        Self {
            supervisor,
            event_bus,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::upload_routes())
        .route("/upload/events", get(api::upload_event_stream))
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

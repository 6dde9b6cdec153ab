use axum::{extract::State, response::IntoResponse};
use cdc_core::{ConnectorLifecycleManager, EngineType, StreamRelay};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

use crate::ApiResponse;

pub mod events;
pub mod profiles;

#[derive(Clone)]
pub struct AppState {
    pub lifecycle: Arc<ConnectorLifecycleManager>,
    pub relay: Arc<StreamRelay>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(lifecycle: Arc<ConnectorLifecycleManager>, relay: Arc<StreamRelay>) -> Self {
        Self {
            lifecycle,
            relay,
            started_at: Instant::now(),
        }
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub uptime_seconds: u64,
}

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "healthy".to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    };

    ApiResponse::success(response, "System is healthy")
}

pub async fn list_engines(State(state): State<AppState>) -> ApiResponse<Vec<EngineType>> {
    ApiResponse::success(state.lifecycle.engines(), "Engines retrieved successfully")
}

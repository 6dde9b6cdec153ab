use axum::{
    extract::{Path, State},
    Json,
};
use cdc_core::{
    ConnectionProfile, DeleteOutcome, EngineType, ReadinessState, ValidationReport,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{handlers::AppState, ApiResponse};

/// Profile as submitted by clients. Omitted id means a fresh one; omitted port
/// means the engine default.
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub engine_type: EngineType,
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub database: String,
    #[serde(default)]
    pub tables: Vec<String>,
}

impl ProfileRequest {
    pub fn into_profile(self) -> ConnectionProfile {
        let port = self.port.unwrap_or_else(|| self.engine_type.default_port());
        let mut profile = ConnectionProfile::new(
            self.name,
            self.engine_type,
            self.host,
            port,
            self.username,
            self.password,
            self.database,
        );
        if let Some(id) = self.id {
            profile.id = id;
        }
        profile.tables = self.tables;
        profile
    }
}

#[derive(Serialize)]
pub struct ReadinessResponse {
    pub id: String,
    pub state: ReadinessState,
}

pub async fn list_profiles(State(state): State<AppState>) -> ApiResponse<Vec<ConnectionProfile>> {
    match state.lifecycle.list().await {
        Ok(profiles) => ApiResponse::success(profiles, "Profiles retrieved successfully"),
        Err(e) => ApiResponse::from_error(e),
    }
}

pub async fn get_profile(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResponse<ConnectionProfile> {
    match state.lifecycle.get(&id).await {
        Ok(Some(profile)) => ApiResponse::success(profile, "Profile retrieved successfully"),
        Ok(None) => ApiResponse::not_found("Profile"),
        Err(e) => ApiResponse::from_error(e),
    }
}

pub async fn create_profile(
    State(state): State<AppState>,
    Json(request): Json<ProfileRequest>,
) -> ApiResponse<ConnectionProfile> {
    match state.lifecycle.create(request.into_profile()).await {
        Ok(saved) => ApiResponse::success(saved, "Profile created and capture job registered"),
        Err(e) => ApiResponse::from_error(e),
    }
}

pub async fn update_profile(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ProfileRequest>,
) -> ApiResponse<ConnectionProfile> {
    let mut profile = request.into_profile();
    profile.id = id;

    match state.lifecycle.update(profile).await {
        Ok(saved) => ApiResponse::success(saved, "Profile updated and capture job re-registered"),
        Err(e) => ApiResponse::from_error(e),
    }
}

pub async fn delete_profile(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResponse<DeleteOutcome> {
    match state.lifecycle.delete(&id).await {
        Ok(outcome) => {
            let message = match &outcome.warning {
                Some(warning) => {
                    warn!("[{}] Deleted with warning: {}", id, warning);
                    format!(
                        "Profile deleted; capture job '{}' could not be removed: {}",
                        outcome.connector_name, warning
                    )
                }
                None => "Profile deleted successfully".to_string(),
            };
            ApiResponse::success(outcome, message)
        }
        Err(e) => ApiResponse::from_error(e),
    }
}

/// Run the readiness checks; a not-ready source is still a successful call
pub async fn validate_profile(
    State(state): State<AppState>,
    Json(request): Json<ProfileRequest>,
) -> ApiResponse<ValidationReport> {
    match state.lifecycle.validate(&request.into_profile()).await {
        Ok(report) => {
            let message = if report.ready() {
                "Source is ready"
            } else {
                "Source is not ready"
            };
            ApiResponse::success(report, message)
        }
        Err(e) => ApiResponse::from_error(e),
    }
}

pub async fn fix_profile(
    State(state): State<AppState>,
    Json(request): Json<ProfileRequest>,
) -> ApiResponse<ValidationReport> {
    match state.lifecycle.fix(&request.into_profile()).await {
        Ok(report) => {
            let message = if report.ready() {
                "Fixes applied, source is ready"
            } else {
                "Fixes applied, some checks still fail"
            };
            ApiResponse::success(report, message)
        }
        Err(e) => ApiResponse::from_error(e),
    }
}

pub async fn get_readiness(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResponse<ReadinessResponse> {
    let readiness = state.lifecycle.readiness(&id).await;
    ApiResponse::success(
        ReadinessResponse {
            id,
            state: readiness,
        },
        "Readiness retrieved successfully",
    )
}

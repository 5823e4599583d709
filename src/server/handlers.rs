use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError};
use std::time::Instant;
use tracing::{debug, error};

use crate::location::{LocationProvider, PositionState, ProviderPhase};
use crate::probe::BackendReport;

use super::state::AppState;

// ─── Error response ──────────────────────────────────────────────

#[derive(Serialize)]
struct ApiErrorBody {
    error: String,
    code: u16,
}

pub(super) struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiErrorBody {
            error: self.1,
            code: self.0.as_u16(),
        };
        (self.0, Json(body)).into_response()
    }
}

fn api_error(status: StatusCode, msg: impl Into<String>) -> ApiError {
    ApiError(status, msg.into())
}

// ─── GET /api/location ───────────────────────────────────────────

#[derive(Serialize, Deserialize, Debug)]
pub struct LocationResponse {
    pub enabled: bool,
    pub phase: ProviderPhase,
    #[serde(flatten)]
    pub state: PositionState,
}

impl LocationResponse {
    fn from_provider(provider: &LocationProvider) -> Self {
        Self {
            enabled: provider.is_enabled(),
            phase: provider.phase(),
            state: provider.state(),
        }
    }
}

pub async fn location(State(state): State<Arc<AppState>>) -> Json<LocationResponse> {
    let provider = state.provider.lock().unwrap_or_else(PoisonError::into_inner);
    Json(LocationResponse::from_provider(&provider))
}

// ─── PUT /api/location/enabled ───────────────────────────────────

#[derive(Deserialize)]
pub struct EnableRequest {
    pub enabled: bool,
}

pub async fn set_enabled(
    State(state): State<Arc<AppState>>,
    Json(body): Json<EnableRequest>,
) -> Json<LocationResponse> {
    let mut provider = state.provider.lock().unwrap_or_else(PoisonError::into_inner);
    provider.set_enabled(body.enabled);
    Json(LocationResponse::from_provider(&provider))
}

// ─── GET /api/backends ───────────────────────────────────────────

pub async fn backends(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<BackendReport>>, ApiError> {
    let start = Instant::now();
    let probe = state.probe.clone();
    let reports = tokio::task::spawn_blocking(move || probe.run())
        .await
        .map_err(|e| {
            error!(error = %e, "backend probe task failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "backend probe failed")
        })?;
    debug!(elapsed_ms = start.elapsed().as_millis() as u64, "backends probed");
    Ok(Json(reports))
}

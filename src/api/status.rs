use axum::{extract::State, Json};

use super::ApiError;
use crate::controller::{AppState, ControlOutput, DebugSnapshot};

/// GET /api/v1/status - output of the latest control cycle
pub async fn get_status(State(st): State<AppState>) -> Result<Json<ControlOutput>, ApiError> {
    st.controller
        .status()
        .await
        .map(Json)
        .ok_or_else(|| ApiError::ServiceUnavailable("no control cycle has completed yet".into()))
}

/// POST /api/v1/recompute - run a cycle now and return its output
pub async fn recompute(State(st): State<AppState>) -> Json<ControlOutput> {
    Json(st.controller.force_recompute().await)
}

/// GET /api/v1/debug/state
pub async fn get_debug_state(
    State(st): State<AppState>,
) -> Result<Json<DebugSnapshot>, ApiError> {
    st.controller
        .debug_state()
        .await
        .map(Json)
        .ok_or_else(|| ApiError::ServiceUnavailable("no control cycle has completed yet".into()))
}

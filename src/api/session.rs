use axum::{extract::State, Json};

use super::ApiError;
use crate::controller::{AppState, ControlOutput, LogEntry, SessionReport};
use crate::domain::SessionOverride;

/// PUT /api/v1/override
///
/// Accepts `{"target_soc": 90, "deadline": "2025-01-16T06:00:00+01:00"}`;
/// either field may be omitted, but not both. Returns the recomputed output.
pub async fn set_override(
    State(st): State<AppState>,
    Json(manual): Json<SessionOverride>,
) -> Result<Json<ControlOutput>, ApiError> {
    Ok(Json(st.controller.set_override(manual).await?))
}

/// DELETE /api/v1/override
pub async fn clear_override(State(st): State<AppState>) -> Json<ControlOutput> {
    Json(st.controller.clear_override().await)
}

/// GET /api/v1/log - newest first, last 24 hours
pub async fn get_action_log(State(st): State<AppState>) -> Json<Vec<LogEntry>> {
    Json(st.controller.action_log().await)
}

pub async fn get_last_session(
    State(st): State<AppState>,
) -> Result<Json<SessionReport>, ApiError> {
    st.controller
        .last_session()
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("no completed session".into()))
}

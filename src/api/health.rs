use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

use crate::controller::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub controller: ComponentHealth,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_cycle_at: Option<DateTime<FixedOffset>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Cycles that may be missed before the controller counts as stalled
const STALL_TICKS: i64 = 3;

/// GET /health
///
/// 200 while control cycles keep completing. 503 before the first cycle
/// and when the loop has stalled.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let now = Utc::now();
    let tick_secs = state.cfg.controller.tick().as_secs() as i64;
    let max_age = chrono::Duration::seconds(tick_secs * STALL_TICKS);

    let controller = match state.controller.status().await {
        Some(out) if now - out.computed_at.with_timezone(&Utc) <= max_age => ComponentHealth {
            status: "healthy".to_string(),
            last_cycle_at: Some(out.computed_at),
            error: None,
        },
        Some(out) => ComponentHealth {
            status: "unhealthy".to_string(),
            last_cycle_at: Some(out.computed_at),
            error: Some("control loop stalled".to_string()),
        },
        None => ComponentHealth {
            status: "starting".to_string(),
            last_cycle_at: None,
            error: None,
        },
    };

    let code = if controller.status == "healthy" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let body = HealthResponse {
        status: if code == StatusCode::OK { "healthy" } else { "unhealthy" }.to_string(),
        timestamp: now,
        controller,
    };
    (code, Json(body))
}

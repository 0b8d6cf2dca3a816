use axum::{extract::State, Json};
use validator::Validate;

use super::ApiError;
use crate::controller::AppState;
use crate::domain::UserSettings;

pub async fn get_settings(State(st): State<AppState>) -> Json<UserSettings> {
    Json(st.controller.settings().await)
}

/// PUT /api/v1/settings - replace the settings and recompute
pub async fn put_settings(
    State(st): State<AppState>,
    Json(settings): Json<UserSettings>,
) -> Result<Json<UserSettings>, ApiError> {
    settings.validate()?;
    st.controller.update_settings(settings).await?;
    Ok(Json(st.controller.settings().await))
}

use axum::{
    routing::{get, post, put},
    Router,
};

use super::{session, settings, status};
use crate::controller::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(status::get_status))
        .route("/recompute", post(status::recompute))
        .route("/debug/state", get(status::get_debug_state))
        .route(
            "/override",
            put(session::set_override).delete(session::clear_override),
        )
        .route("/log", get(session::get_action_log))
        .route("/sessions/last", get(session::get_last_session))
        .route(
            "/settings",
            get(settings::get_settings).put(settings::put_settings),
        )
        .with_state(state)
}

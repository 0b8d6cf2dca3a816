pub mod error;
pub mod health;
pub mod session;
pub mod settings;
pub mod status;
pub mod v1;

use axum::{
    http::{header, HeaderValue, Method},
    routing::get,
    Router,
};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::{config::Config, controller::AppState};

pub use error::{ApiError, ErrorResponse};

pub fn router(state: AppState, cfg: &Config) -> Router {
    let mut router = Router::new()
        .route("/health", get(health::health_check))
        .with_state(state.clone())
        .nest("/api/v1", v1::router(state));

    if cfg.server.enable_cors {
        let cors = CorsLayer::new()
            .allow_origin(HeaderValue::from_static("http://localhost:3000"))
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_headers([header::CONTENT_TYPE]);
        router = router.layer(cors);
    }

    router
        .layer(
            ServiceBuilder::new()
                .layer(axum::extract::DefaultBodyLimit::max(64 * 1024))
                .layer(TimeoutLayer::new(Duration::from_secs(
                    cfg.server.request_timeout_secs,
                ))),
        )
        .layer(TraceLayer::new_for_http())
}

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderName, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use super::handlers;
use crate::config::GatewayConfig;
use crate::state::AppState;

/// Per-request budget for signaling reads and writes
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Signaling bodies are small; anything past this is rejected early
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Create the signaling router
pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config);

    Router::new()
        .route("/webrtc/offer", post(handlers::webrtc_offer))
        .route("/webrtc/candidate", post(handlers::webrtc_candidate))
        .route("/webrtc/candidates", get(handlers::webrtc_candidates))
        .route("/webrtc/health", get(handlers::webrtc_health))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

fn cors_layer(config: &GatewayConfig) -> CorsLayer {
    let peer_id_header = HeaderName::from_static(handlers::PEER_ID_HEADER);
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, peer_id_header.clone()])
        .expose_headers([peer_id_header]);

    if config.allow_any_origin() {
        cors.allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|origin| origin.parse().ok())
            .collect();
        cors.allow_origin(origins)
    }
}

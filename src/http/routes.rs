use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    let artifacts = ServeDir::new(&state.artifacts_dir);

    Router::new()
        // Health and capability probes
        .route("/health", get(handlers::health_check))
        .route("/capabilities", get(handlers::capabilities))
        // Capture control
        .route("/capture/start", post(handlers::start_capture))
        .route("/capture/pause", post(handlers::pause_capture))
        .route("/capture/resume", post(handlers::resume_capture))
        .route("/capture/cancel", post(handlers::cancel_capture))
        .route("/capture/stop", post(handlers::stop_capture))
        .route("/capture/status", get(handlers::capture_status))
        // Conversion
        .route("/conversion/status", get(handlers::conversion_status))
        .route("/conversion/cancel", post(handlers::cancel_conversion))
        // Finished files
        .nest_service("/artifacts", artifacts)
        .layer(CorsLayer::permissive())
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Session control (moderator only)
        .route("/recording/start", post(handlers::start_recording))
        .route("/recording/stop", post(handlers::stop_recording))
        // Local participant settings
        .route("/recording/format", post(handlers::switch_format))
        .route("/recording/mute", post(handlers::set_muted))
        .route("/recording/device", post(handlers::set_mic_device))
        // Queries
        .route("/recording/status", get(handlers::get_status))
        .route("/recording/stats", get(handlers::get_stats))
        .route("/recording/sessions", get(handlers::list_sessions))
        .route(
            "/recording/sessions/:token/export",
            post(handlers::export_session),
        )
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

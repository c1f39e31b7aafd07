//! HTTP control API for the local participant
//!
//! - POST /recording/start - Start a session (moderator)
//! - POST /recording/stop - Stop the current session (moderator)
//! - POST /recording/format - Format of the next session
//! - POST /recording/mute - Mute/unmute the recorded microphone
//! - POST /recording/device - Switch microphone
//! - GET /recording/status - Controller state
//! - GET /recording/stats - Stats of every participant
//! - GET /recording/sessions - Local session history
//! - POST /recording/sessions/:token/export - Retry export and upload
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;

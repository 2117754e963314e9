//! HTTP API server for external control
//!
//! This module provides a REST API mirroring the record and play toggles:
//! - POST /recording/start - Start recording into the backing store
//! - POST /recording/stop - Stop recording
//! - POST /playback/start - Play the backing store
//! - POST /playback/stop - Stop playback
//! - GET /status - Query session status
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;

use crate::session::AudioSession;
use std::sync::Arc;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// The session every request acts on
    pub session: Arc<AudioSession>,
}

impl AppState {
    pub fn new(session: Arc<AudioSession>) -> Self {
        Self { session }
    }
}

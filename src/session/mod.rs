//! Duplex record/playback session management
//!
//! This module provides the `AudioSession` abstraction that manages:
//! - Microphone capture into the raw PCM backing store
//! - Playback of the store through the output device
//! - The Idle / Recording / Playing state machine
//! - Background worker lifecycle (stop flag, bounded join)
//! - Session statistics and event notifications

mod config;
mod session;
mod stats;
mod worker;

pub use config::SessionConfig;
pub use session::AudioSession;
pub use stats::{SessionEvent, SessionState, SessionStats};

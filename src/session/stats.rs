use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

use crate::error::SessionError;

/// What the session is doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Recording,
    Playing,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Recording => "recording",
            SessionState::Playing => "playing",
        };
        f.write_str(name)
    }
}

/// Point-in-time view of a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    /// Current state
    pub state: SessionState,

    /// Id of the current or most recent recording/playback
    pub take_id: Option<Uuid>,

    /// When the current or most recent recording/playback started
    pub started_at: Option<DateTime<Utc>>,

    /// Seconds since `started_at`
    pub elapsed_secs: f64,

    /// Frames captured so far, or held by the store when not recording
    pub recorded_frames: u64,

    /// Frames written to the output device by the current or last playback
    pub played_frames: u64,

    /// Failure left behind by a background loop
    pub last_error: Option<String>,

    pub sample_rate: u32,
    pub channels: u16,
}

/// Notifications broadcast to session subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    RecordingStarted {
        take_id: Uuid,
    },
    RecordingStopped {
        take_id: Uuid,
        elapsed: Duration,
        frames: u64,
    },
    PlaybackStarted {
        take_id: Uuid,
        frames: u64,
    },
    /// Playback reached the end of the store on its own
    PlaybackFinished {
        take_id: Uuid,
        frames: u64,
    },
    /// Playback was cut short by `stop_playback`
    PlaybackStopped {
        take_id: Uuid,
        frames: u64,
    },
    /// A background loop ended early; the session is back to idle
    WorkerFailed {
        take_id: Uuid,
        error: SessionError,
    },
}

use std::time::Duration;
use thiserror::Error;

/// Errors reported by [`AudioSession`](crate::session::AudioSession)
///
/// Device and store failures carry the rendered source chain as text so the
/// error can be kept as `last_error` and handed to several observers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("microphone permission has not been granted")]
    PermissionDenied,

    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    #[error("audio device I/O failed: {0}")]
    DeviceIo(String),

    #[error("no recording to play back")]
    NoRecording,

    #[error("session is busy {0}")]
    Busy(&'static str),

    #[error("audio worker did not exit within {0:?}")]
    WorkerHang(Duration),

    #[error("audio worker panicked")]
    WorkerPanicked,

    #[error("backing store I/O failed: {0}")]
    Store(String),
}

impl SessionError {
    pub(crate) fn device_unavailable(err: anyhow::Error) -> Self {
        Self::DeviceUnavailable(format!("{:#}", err))
    }

    pub(crate) fn device_io(err: anyhow::Error) -> Self {
        Self::DeviceIo(format!("{:#}", err))
    }

    pub(crate) fn store(err: anyhow::Error) -> Self {
        Self::Store(format!("{:#}", err))
    }
}

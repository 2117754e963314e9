use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::audio::{AudioBackendConfig, PcmFormat};

/// Configuration for an audio session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Raw PCM backing store, overwritten by every recording
    pub store_path: PathBuf,

    /// Fixed stream format shared by capture, store and playback
    pub format: PcmFormat,

    /// Samples per channel moved by one device read or write
    pub frame_samples: usize,

    /// Output device buffer size as a multiple of `frame_samples`
    /// Default: 2
    pub playback_buffer_factor: usize,

    /// Upper bound on waiting for a worker to exit after a stop request
    pub join_timeout: Duration,
}

impl SessionConfig {
    /// Stream parameters handed to the backend when a device is opened
    pub fn backend_config(&self) -> AudioBackendConfig {
        let frame_samples = self.frame_samples.max(1);
        AudioBackendConfig {
            format: self.format,
            frame_samples,
            buffer_frames: frame_samples * self.playback_buffer_factor.max(1),
        }
    }

    /// Interleaved samples in one device block
    pub fn block_samples(&self) -> usize {
        self.frame_samples.max(1) * self.format.channels.max(1) as usize
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("recordings/audio_record.pcm"),
            format: PcmFormat::mono(44100),
            frame_samples: 2048,
            playback_buffer_factor: 2,
            join_timeout: Duration::from_secs(2),
        }
    }
}

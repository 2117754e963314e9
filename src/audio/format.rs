use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bytes per sample for signed 16-bit little-endian PCM
pub const BYTES_PER_SAMPLE: usize = 2;

/// Raw PCM stream format (always signed 16-bit little-endian, interleaved)
///
/// The store carries no header, so this travels out-of-band in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PcmFormat {
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels (1 = mono)
    pub channels: u16,
}

impl PcmFormat {
    pub fn mono(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            channels: 1,
        }
    }

    /// Size of one frame (one sample per channel) in bytes
    pub fn frame_bytes(&self) -> usize {
        self.channels as usize * BYTES_PER_SAMPLE
    }

    /// Whole frames contained in `bytes`; a trailing partial frame is ignored
    pub fn frames_in_bytes(&self, bytes: u64) -> u64 {
        bytes / self.frame_bytes() as u64
    }

    /// Number of frames covering `duration` at this rate (rounded down)
    pub fn frames_for(&self, duration: Duration) -> u64 {
        (duration.as_secs_f64() * self.sample_rate as f64) as u64
    }

    pub fn duration_of_frames(&self, frames: u64) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(frames as f64 / self.sample_rate as f64)
    }

    /// Duration of a fixed-size frame block of `samples` per channel
    pub fn block_duration(&self, samples: usize) -> Duration {
        self.duration_of_frames(samples as u64)
    }
}

impl Default for PcmFormat {
    fn default() -> Self {
        Self::mono(44100)
    }
}

use anyhow::Result;
use serde::Deserialize;
use std::sync::Arc;

use super::format::PcmFormat;
use super::simulated::SimulatedBackend;

/// Configuration handed to a backend when a stream is opened
#[derive(Debug, Clone)]
pub struct AudioBackendConfig {
    /// Fixed stream format
    pub format: PcmFormat,
    /// Samples per channel moved by one read or write call
    pub frame_samples: usize,
    /// Output device buffer size in frames
    pub buffer_frames: usize,
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            format: PcmFormat::default(),
            frame_samples: 2048,
            buffer_frames: 4096, // 2x the block size
        }
    }
}

/// An open capture stream
///
/// Owned by exactly one worker; reads block until the device has data.
pub trait InputStream: Send {
    /// Read up to `buf.len()` interleaved samples.
    ///
    /// `Ok(0)` means the device had nothing to hand over yet; the caller polls again.
    fn read_frames(&mut self, buf: &mut [i16]) -> Result<usize>;

    /// Release the device
    fn close(&mut self) -> Result<()>;
}

/// An open playback stream
pub trait OutputStream: Send {
    /// Write interleaved samples, blocking until the device buffer accepted all of them
    fn write_frames(&mut self, samples: &[i16]) -> Result<()>;

    /// Block until everything written so far has been played
    fn drain(&mut self) -> Result<()> {
        Ok(())
    }

    /// Release the device, discarding anything still queued
    fn close(&mut self) -> Result<()>;
}

/// Audio device backend trait
///
/// Platform-specific implementations:
/// - cpal: host default input/output devices (feature `backend-cpal`)
/// - Simulated: tone generator and recording sink (tests, headless runs)
pub trait AudioBackend: Send + Sync {
    /// Get backend name for logging
    fn name(&self) -> &str;

    /// Whether the platform granted microphone access
    fn has_capture_permission(&self) -> bool {
        true
    }

    /// Open the capture device with the fixed format
    fn open_input(&self, config: &AudioBackendConfig) -> Result<Box<dyn InputStream>>;

    /// Open the playback device with the fixed format
    fn open_output(&self, config: &AudioBackendConfig) -> Result<Box<dyn OutputStream>>;
}

/// Backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process tone generator and sink
    Simulated,
    /// Host audio devices through cpal
    Cpal,
}

impl BackendKind {
    /// Whether this backend fabricates audio instead of using real devices
    pub fn is_synthetic(self) -> bool {
        matches!(self, BackendKind::Simulated)
    }
}

/// Audio backend factory
pub struct AudioBackendFactory;

impl AudioBackendFactory {
    /// Create audio backend based on platform and configuration
    pub fn create(kind: BackendKind) -> Result<Arc<dyn AudioBackend>> {
        match kind {
            BackendKind::Simulated => Ok(Arc::new(SimulatedBackend::new())),

            BackendKind::Cpal => {
                #[cfg(feature = "backend-cpal")]
                {
                    use super::cpal_backend::CpalBackend;
                    Ok(Arc::new(CpalBackend::new()))
                }

                #[cfg(not(feature = "backend-cpal"))]
                {
                    anyhow::bail!("cpal backend is not available in this build (missing 'backend-cpal' feature)")
                }
            }
        }
    }
}

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::audio::{BackendKind, PcmFormat};
use crate::session::SessionConfig;

/// Default configuration file, resolved by the `config` crate with any supported extension
pub const DEFAULT_CONFIG_PATH: &str = "config/duplex-recorder";

/// Prefix for environment overrides, e.g. `DUPLEX_AUDIO__SAMPLE_RATE=32000`
const ENV_PREFIX: &str = "DUPLEX";

#[derive(Debug, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub audio: AudioConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Deserialize)]
pub struct AudioConfig {
    pub store_path: String,
    pub sample_rate: u32,
    pub frame_samples: usize,
    pub playback_buffer_factor: usize,
    pub join_timeout_ms: u64,
    pub backend: BackendKind,
}

impl Config {
    /// Load defaults, then the optional file at `path`, then `DUPLEX_*` environment overrides
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .set_default("service.name", "duplex-recorder")?
            .set_default("service.http.bind", "127.0.0.1")?
            .set_default("service.http.port", 8470)?
            .set_default("audio.store_path", "recordings/audio_record.pcm")?
            .set_default("audio.sample_rate", 44100)?
            .set_default("audio.frame_samples", 2048)?
            .set_default("audio.playback_buffer_factor", 2)?
            .set_default("audio.join_timeout_ms", 2000)?
            .set_default("audio.backend", "simulated")?
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .with_context(|| format!("Failed to load configuration from {}", path))?;

        let cfg: Self = settings.try_deserialize()?;
        if cfg.audio.sample_rate == 0 {
            anyhow::bail!("audio.sample_rate must be greater than zero");
        }

        Ok(cfg)
    }

    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.service.http.bind, self.service.http.port)
    }
}

impl AudioConfig {
    /// Session parameters; the stream is always mono
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            store_path: PathBuf::from(&self.store_path),
            format: PcmFormat::mono(self.sample_rate),
            frame_samples: self.frame_samples,
            playback_buffer_factor: self.playback_buffer_factor,
            join_timeout: Duration::from_millis(self.join_timeout_ms),
        }
    }
}

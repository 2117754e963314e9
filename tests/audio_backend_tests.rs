// Unit tests for audio backend abstractions
//
// These tests verify the core audio types and interfaces work correctly.

use duplex_recorder::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, BackendKind, PcmFormat, SessionConfig,
    SimulatedBackend,
};
use std::time::{Duration, Instant};

#[test]
fn test_audio_backend_config_default() {
    let config = AudioBackendConfig::default();

    assert_eq!(config.format, PcmFormat::mono(44100), "Default should be 44.1kHz mono");
    assert_eq!(config.frame_samples, 2048);
    assert_eq!(config.buffer_frames, 4096, "Output buffer should be twice the block");
}

#[test]
fn test_session_config_derives_backend_config() {
    let config = SessionConfig {
        format: PcmFormat::mono(16000),
        frame_samples: 320,
        playback_buffer_factor: 3,
        ..SessionConfig::default()
    };

    let backend = config.backend_config();

    assert_eq!(backend.format.sample_rate, 16000);
    assert_eq!(backend.frame_samples, 320);
    assert_eq!(backend.buffer_frames, 960);
    assert_eq!(config.block_samples(), 320);
}

#[test]
fn test_session_config_clamps_zero_sizes() {
    let config = SessionConfig {
        frame_samples: 0,
        playback_buffer_factor: 0,
        ..SessionConfig::default()
    };

    let backend = config.backend_config();

    assert_eq!(backend.frame_samples, 1);
    assert_eq!(backend.buffer_frames, 1);
}

#[test]
fn test_factory_creates_simulated_backend() {
    let backend = AudioBackendFactory::create(BackendKind::Simulated).unwrap();

    assert_eq!(backend.name(), "simulated");
    assert!(backend.has_capture_permission());
}

#[cfg(not(feature = "backend-cpal"))]
#[test]
fn test_factory_without_cpal_feature_fails() {
    let result = AudioBackendFactory::create(BackendKind::Cpal);

    assert!(result.is_err(), "cpal backend needs the backend-cpal feature");
}

#[test]
fn test_simulated_input_is_paced_like_a_device() {
    let backend = SimulatedBackend::new();
    let config = AudioBackendConfig {
        format: PcmFormat::mono(8000),
        frame_samples: 800,
        buffer_frames: 1600,
    };

    let mut input = backend.open_input(&config).unwrap();
    let mut buf = vec![0i16; 800];
    let started = Instant::now();
    for _ in 0..3 {
        assert_eq!(input.read_frames(&mut buf).unwrap(), 800);
    }

    // Three 100ms blocks cannot arrive faster than real time
    assert!(started.elapsed() >= Duration::from_millis(290));
    assert!(buf.iter().any(|&s| s != 0), "tone should not be silent");

    input.close().unwrap();
    assert_eq!(backend.open_inputs(), 0);
}

#[test]
fn test_simulated_output_records_samples() {
    let backend = SimulatedBackend::new();
    let config = AudioBackendConfig::default();

    let mut output = backend.open_output(&config).unwrap();
    output.write_frames(&[1, 2, 3]).unwrap();
    output.write_frames(&[4, 5]).unwrap();
    output.drain().unwrap();
    output.close().unwrap();

    assert_eq!(backend.played_samples(), vec![1, 2, 3, 4, 5]);
    assert_eq!(backend.open_outputs(), 0);
    assert!(output.write_frames(&[6]).is_err(), "closed stream rejects writes");
}

//! In-process audio backend
//!
//! Capture produces a 440 Hz tone paced against the wall clock, so a recording
//! of duration D holds D worth of frames exactly like a real microphone would.
//! Playback collects every written sample for inspection. Permission, device
//! availability and mid-stream failures can all be toggled at runtime.

use anyhow::{bail, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tracing::debug;

use super::backend::{AudioBackend, AudioBackendConfig, InputStream, OutputStream};
use super::format::PcmFormat;

const TONE_HZ: f64 = 440.0;
const TONE_AMPLITUDE: f64 = 8192.0;

/// Frame budget meaning "never fail"
const NO_FAILURE: u64 = u64::MAX;

struct SimState {
    capture_permission: AtomicBool,
    input_available: AtomicBool,
    output_available: AtomicBool,
    paced_output: AtomicBool,
    fail_input_after: AtomicU64,
    fail_output_after: AtomicU64,
    open_inputs: AtomicUsize,
    open_outputs: AtomicUsize,
    played: Mutex<Vec<i16>>,
}

impl SimState {
    fn played(&self) -> MutexGuard<'_, Vec<i16>> {
        self.played.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Simulated audio devices
///
/// Cloning yields another handle onto the same devices, so a test can keep one
/// handle for inspection while the session owns the other.
#[derive(Clone)]
pub struct SimulatedBackend {
    state: Arc<SimState>,
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(SimState {
                capture_permission: AtomicBool::new(true),
                input_available: AtomicBool::new(true),
                output_available: AtomicBool::new(true),
                paced_output: AtomicBool::new(false),
                fail_input_after: AtomicU64::new(NO_FAILURE),
                fail_output_after: AtomicU64::new(NO_FAILURE),
                open_inputs: AtomicUsize::new(0),
                open_outputs: AtomicUsize::new(0),
                played: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn set_capture_permission(&self, granted: bool) {
        self.state.capture_permission.store(granted, Ordering::SeqCst);
    }

    pub fn set_input_available(&self, available: bool) {
        self.state.input_available.store(available, Ordering::SeqCst);
    }

    pub fn set_output_available(&self, available: bool) {
        self.state.output_available.store(available, Ordering::SeqCst);
    }

    /// Make playback take real time instead of accepting samples instantly
    pub fn set_paced_output(&self, paced: bool) {
        self.state.paced_output.store(paced, Ordering::SeqCst);
    }

    /// Fail reads once the input stream has produced `frames` frames
    pub fn fail_input_after(&self, frames: u64) {
        self.state.fail_input_after.store(frames, Ordering::SeqCst);
    }

    /// Fail writes once the output stream has accepted `frames` frames
    pub fn fail_output_after(&self, frames: u64) {
        self.state.fail_output_after.store(frames, Ordering::SeqCst);
    }

    /// Samples written to the most recently opened output stream
    pub fn played_samples(&self) -> Vec<i16> {
        self.state.played().clone()
    }

    pub fn open_inputs(&self) -> usize {
        self.state.open_inputs.load(Ordering::SeqCst)
    }

    pub fn open_outputs(&self) -> usize {
        self.state.open_outputs.load(Ordering::SeqCst)
    }
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for SimulatedBackend {
    fn name(&self) -> &str {
        "simulated"
    }

    fn has_capture_permission(&self) -> bool {
        self.state.capture_permission.load(Ordering::SeqCst)
    }

    fn open_input(&self, config: &AudioBackendConfig) -> Result<Box<dyn InputStream>> {
        if !self.state.input_available.load(Ordering::SeqCst) {
            bail!("simulated input device is unavailable");
        }

        self.state.open_inputs.fetch_add(1, Ordering::SeqCst);
        debug!(
            "Simulated input opened: {}Hz, {} channels",
            config.format.sample_rate, config.format.channels
        );

        Ok(Box::new(SimulatedInput {
            state: Arc::clone(&self.state),
            format: config.format,
            opened_at: Instant::now(),
            produced: 0,
            fail_after: self.state.fail_input_after.load(Ordering::SeqCst),
            closed: false,
        }))
    }

    fn open_output(&self, config: &AudioBackendConfig) -> Result<Box<dyn OutputStream>> {
        if !self.state.output_available.load(Ordering::SeqCst) {
            bail!("simulated output device is unavailable");
        }

        self.state.played().clear();
        self.state.open_outputs.fetch_add(1, Ordering::SeqCst);
        debug!(
            "Simulated output opened: {}Hz, buffer {} frames",
            config.format.sample_rate, config.buffer_frames
        );

        Ok(Box::new(SimulatedOutput {
            state: Arc::clone(&self.state),
            format: config.format,
            opened_at: Instant::now(),
            accepted: 0,
            paced: self.state.paced_output.load(Ordering::SeqCst),
            fail_after: self.state.fail_output_after.load(Ordering::SeqCst),
            closed: false,
        }))
    }
}

struct SimulatedInput {
    state: Arc<SimState>,
    format: PcmFormat,
    opened_at: Instant,
    /// Frames handed out so far
    produced: u64,
    fail_after: u64,
    closed: bool,
}

impl InputStream for SimulatedInput {
    fn read_frames(&mut self, buf: &mut [i16]) -> Result<usize> {
        if self.closed {
            bail!("read from a closed input stream");
        }
        if self.produced >= self.fail_after {
            bail!("simulated input device failure after {} frames", self.produced);
        }

        let channels = self.format.channels.max(1) as usize;
        let frames = buf.len() / channels;

        // A real device only hands over a block once it has been captured
        let ready_at = self.opened_at + self.format.duration_of_frames(self.produced + frames as u64);
        let now = Instant::now();
        if ready_at > now {
            std::thread::sleep(ready_at - now);
        }

        let rate = self.format.sample_rate.max(1) as f64;
        for (i, frame) in buf.chunks_exact_mut(channels).enumerate() {
            let t = (self.produced + i as u64) as f64 / rate;
            let sample = (TONE_AMPLITUDE * (2.0 * std::f64::consts::PI * TONE_HZ * t).sin()) as i16;
            frame.fill(sample);
        }

        self.produced += frames as u64;
        Ok(frames * channels)
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.state.open_inputs.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl Drop for SimulatedInput {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

struct SimulatedOutput {
    state: Arc<SimState>,
    format: PcmFormat,
    opened_at: Instant,
    /// Frames accepted so far
    accepted: u64,
    paced: bool,
    fail_after: u64,
    closed: bool,
}

impl OutputStream for SimulatedOutput {
    fn write_frames(&mut self, samples: &[i16]) -> Result<()> {
        if self.closed {
            bail!("write to a closed output stream");
        }
        if self.accepted >= self.fail_after {
            bail!("simulated output device failure after {} frames", self.accepted);
        }

        let frames = (samples.len() / self.format.channels.max(1) as usize) as u64;

        if self.paced {
            let due = self.opened_at + self.format.duration_of_frames(self.accepted);
            let now = Instant::now();
            if due > now {
                std::thread::sleep(due - now);
            }
        }

        self.state.played().extend_from_slice(samples);
        self.accepted += frames;
        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        if self.paced {
            let done_at = self.opened_at + self.format.duration_of_frames(self.accepted);
            let now = Instant::now();
            if done_at > now {
                std::thread::sleep(done_at - now);
            }
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.state.open_outputs.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl Drop for SimulatedOutput {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(rate: u32, frame_samples: usize) -> AudioBackendConfig {
        AudioBackendConfig {
            format: PcmFormat::mono(rate),
            frame_samples,
            buffer_frames: frame_samples * 2,
        }
    }

    #[test]
    fn input_is_paced_by_wall_clock() {
        let backend = SimulatedBackend::new();
        let mut input = backend.open_input(&config(8000, 400)).unwrap();
        let mut buf = vec![0i16; 400];

        let start = Instant::now();
        for _ in 0..3 {
            assert_eq!(input.read_frames(&mut buf).unwrap(), 400);
        }

        // 3 blocks of 50ms
        assert!(start.elapsed() >= std::time::Duration::from_millis(145));
    }

    #[test]
    fn close_releases_device() {
        let backend = SimulatedBackend::new();
        let mut input = backend.open_input(&config(8000, 80)).unwrap();
        assert_eq!(backend.open_inputs(), 1);
        input.close().unwrap();
        input.close().unwrap();
        assert_eq!(backend.open_inputs(), 0);
    }

    #[test]
    fn injected_output_failure() {
        let backend = SimulatedBackend::new();
        backend.fail_output_after(100);
        let mut output = backend.open_output(&config(8000, 100)).unwrap();

        output.write_frames(&[1; 100]).unwrap();
        assert!(output.write_frames(&[1; 100]).is_err());
        assert_eq!(backend.played_samples().len(), 100);
    }

    #[test]
    fn unavailable_devices_refuse_to_open() {
        let backend = SimulatedBackend::new();
        backend.set_input_available(false);
        backend.set_output_available(false);

        assert!(backend.open_input(&config(8000, 80)).is_err());
        assert!(backend.open_output(&config(8000, 80)).is_err());
    }
}

//! Host audio devices through cpal
//!
//! cpal is callback driven while the session workers expect blocking reads and
//! writes, so each open stream pairs the device callback with a bounded sample
//! queue. The `cpal::Stream` itself lives on a dedicated thread because it is
//! not `Send` on every host.

use anyhow::{anyhow, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, StreamConfig};
use std::collections::VecDeque;
use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info, warn};

use super::backend::{AudioBackend, AudioBackendConfig, InputStream, OutputStream};

/// How long a blocked read or write waits before re-checking for stream errors
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Captured audio the input queue holds before dropping the oldest samples
const INPUT_QUEUE_SECS: usize = 10;

struct SampleQueue {
    samples: Mutex<VecDeque<i16>>,
    changed: Condvar,
    capacity: usize,
    error: Mutex<Option<String>>,
}

impl SampleQueue {
    fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
            changed: Condvar::new(),
            capacity,
            error: Mutex::new(None),
        })
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<i16>> {
        self.samples.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, VecDeque<i16>>) -> MutexGuard<'a, VecDeque<i16>> {
        match self.changed.wait_timeout(guard, POLL_INTERVAL) {
            Ok((guard, _)) => guard,
            Err(poisoned) => poisoned.into_inner().0,
        }
    }

    fn set_error(&self, message: String) {
        *self.error.lock().unwrap_or_else(|p| p.into_inner()) = Some(message);
        self.changed.notify_all();
    }

    fn check_error(&self) -> Result<()> {
        match self.error.lock().unwrap_or_else(|p| p.into_inner()).as_ref() {
            Some(message) => Err(anyhow!("audio stream error: {}", message)),
            None => Ok(()),
        }
    }
}

/// Keeps a `cpal::Stream` alive on its own thread until shut down
struct StreamThread {
    stop_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl StreamThread {
    fn spawn<F>(name: &str, build: F) -> Result<Self>
    where
        F: FnOnce() -> Result<cpal::Stream> + Send + 'static,
    {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let stream = match build().and_then(|stream| {
                    stream.play().context("Failed to start audio stream")?;
                    Ok(stream)
                }) {
                    Ok(stream) => {
                        let _ = ready_tx.send(Ok(()));
                        stream
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                // Parked until shutdown or the owning handle is dropped
                let _ = stop_rx.recv();
                drop(stream);
            })
            .context("Failed to spawn audio stream thread")?;

        ready_rx
            .recv()
            .map_err(|_| anyhow!("audio stream thread exited during setup"))??;

        Ok(Self {
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    fn shutdown(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Audio stream thread panicked");
            }
        }
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Stream parameters; `buffer_frames` requests a fixed device buffer, otherwise the host default
fn stream_config(config: &AudioBackendConfig, buffer_frames: Option<usize>) -> StreamConfig {
    StreamConfig {
        channels: config.format.channels,
        sample_rate: SampleRate(config.format.sample_rate),
        buffer_size: match buffer_frames {
            Some(frames) => BufferSize::Fixed(frames as u32),
            None => BufferSize::Default,
        },
    }
}

/// Default host input and output devices
pub struct CpalBackend;

impl CpalBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &str {
        "cpal"
    }

    fn open_input(&self, config: &AudioBackendConfig) -> Result<Box<dyn InputStream>> {
        let capacity = config.format.sample_rate as usize
            * config.format.channels as usize
            * INPUT_QUEUE_SECS;
        let queue = SampleQueue::new(capacity);
        let stream_cfg = stream_config(config, None);

        let callback_queue = Arc::clone(&queue);
        let error_queue = Arc::clone(&queue);
        let stream = StreamThread::spawn("pcm-capture", move || {
            let host = cpal::default_host();
            let device = host
                .default_input_device()
                .ok_or_else(|| anyhow!("No input device available"))?;
            info!(
                "Opening input device: {}",
                device.name().unwrap_or_else(|_| "unknown".to_string())
            );

            let stream = device.build_input_stream(
                &stream_cfg,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    let mut samples = callback_queue.lock();
                    let overflow = (samples.len() + data.len()).saturating_sub(callback_queue.capacity);
                    if overflow > 0 {
                        samples.drain(..overflow.min(samples.len()));
                    }
                    samples.extend(data.iter().copied());
                    callback_queue.changed.notify_all();
                },
                move |err| {
                    error!("Audio input stream error: {}", err);
                    error_queue.set_error(err.to_string());
                },
                None,
            )?;
            Ok(stream)
        })?;

        Ok(Box::new(CpalInput {
            queue,
            stream: Some(stream),
        }))
    }

    fn open_output(&self, config: &AudioBackendConfig) -> Result<Box<dyn OutputStream>> {
        let channels = config.format.channels.max(1) as usize;
        let queue = SampleQueue::new(config.buffer_frames.max(1) * channels);
        let stream_cfg = stream_config(config, Some(config.buffer_frames));

        let callback_queue = Arc::clone(&queue);
        let error_queue = Arc::clone(&queue);
        let stream = StreamThread::spawn("pcm-playback", move || {
            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or_else(|| anyhow!("No output device available"))?;
            info!(
                "Opening output device: {}",
                device.name().unwrap_or_else(|_| "unknown".to_string())
            );

            let stream = device.build_output_stream(
                &stream_cfg,
                move |output: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    let mut samples = callback_queue.lock();
                    for slot in output.iter_mut() {
                        *slot = samples.pop_front().unwrap_or(0);
                    }
                    callback_queue.changed.notify_all();
                },
                move |err| {
                    error!("Audio output stream error: {}", err);
                    error_queue.set_error(err.to_string());
                },
                None,
            )?;
            Ok(stream)
        })?;

        Ok(Box::new(CpalOutput {
            queue,
            stream: Some(stream),
        }))
    }
}

struct CpalInput {
    queue: Arc<SampleQueue>,
    stream: Option<StreamThread>,
}

impl InputStream for CpalInput {
    fn read_frames(&mut self, buf: &mut [i16]) -> Result<usize> {
        if self.stream.is_none() {
            anyhow::bail!("read from a closed input stream");
        }

        let mut samples = self.queue.lock();
        if samples.len() < buf.len() {
            self.queue.check_error()?;
            samples = self.queue.wait(samples);
        }

        let n = samples.len().min(buf.len());
        for (dst, src) in buf.iter_mut().zip(samples.drain(..n)) {
            *dst = src;
        }
        drop(samples);

        if n == 0 {
            self.queue.check_error()?;
        }
        Ok(n)
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            stream.shutdown();
        }
        Ok(())
    }
}

struct CpalOutput {
    queue: Arc<SampleQueue>,
    stream: Option<StreamThread>,
}

impl OutputStream for CpalOutput {
    fn write_frames(&mut self, samples: &[i16]) -> Result<()> {
        if self.stream.is_none() {
            anyhow::bail!("write to a closed output stream");
        }

        let mut pending = samples;
        while !pending.is_empty() {
            self.queue.check_error()?;

            let mut queued = self.queue.lock();
            let room = self.queue.capacity.saturating_sub(queued.len());
            if room == 0 {
                let _ = self.queue.wait(queued);
                continue;
            }

            let n = room.min(pending.len());
            queued.extend(pending[..n].iter().copied());
            pending = &pending[n..];
        }

        Ok(())
    }

    fn drain(&mut self) -> Result<()> {
        loop {
            self.queue.check_error()?;
            let queued = self.queue.lock();
            if queued.is_empty() {
                return Ok(());
            }
            let _ = self.queue.wait(queued);
        }
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            let dropped = self.queue.lock().len();
            if dropped > 0 {
                warn!("Discarding {} queued playback samples", dropped);
            }
            stream.shutdown();
        }
        Ok(())
    }
}

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::audio::{InputStream, OutputStream, StoreReader, StoreWriter};
use crate::error::SessionError;

/// Stop request shared between the caller and one background worker
#[derive(Clone, Default)]
pub(crate) struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub(crate) fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// How a playback loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PlaybackEnd {
    /// Reached the end of the store
    Finished,
    /// Stop was requested
    Stopped,
}

/// What a worker leaves behind when it exits cleanly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkerExit {
    Captured { bytes: u64 },
    Played(PlaybackEnd),
}

/// Capture until stopped or the device fails.
///
/// The input device is always released and the store flushed before returning,
/// whatever the outcome.
pub(crate) fn run_capture(
    mut input: Box<dyn InputStream>,
    mut writer: StoreWriter,
    block_samples: usize,
    channels: usize,
    stop: StopFlag,
    captured: &AtomicU64,
) -> Result<WorkerExit, SessionError> {
    let result = capture_loop(input.as_mut(), &mut writer, block_samples, channels, &stop, captured);

    if let Err(e) = input.close() {
        warn!("Failed to close input device: {:#}", e);
    }
    let bytes = writer.finish().map_err(SessionError::store);

    result?;
    Ok(WorkerExit::Captured { bytes: bytes? })
}

fn capture_loop(
    input: &mut dyn InputStream,
    writer: &mut StoreWriter,
    block_samples: usize,
    channels: usize,
    stop: &StopFlag,
    captured: &AtomicU64,
) -> Result<(), SessionError> {
    let mut buf = vec![0i16; block_samples];

    while !stop.is_requested() {
        let n = input.read_frames(&mut buf).map_err(SessionError::device_io)?;
        if n == 0 {
            continue;
        }
        writer.append(&buf[..n]).map_err(SessionError::store)?;
        captured.fetch_add((n / channels) as u64, Ordering::SeqCst);
    }

    debug!("Capture loop observed stop after {} bytes", writer.bytes_written());
    Ok(())
}

/// Play the store until its end or a stop request.
///
/// On natural end the device is drained first so every written frame is heard.
pub(crate) fn run_playback(
    mut reader: StoreReader,
    mut output: Box<dyn OutputStream>,
    block_samples: usize,
    channels: usize,
    stop: StopFlag,
    played: &AtomicU64,
) -> Result<WorkerExit, SessionError> {
    let result = playback_loop(&mut reader, output.as_mut(), block_samples, channels, &stop, played);

    if let Err(e) = output.close() {
        warn!("Failed to close output device: {:#}", e);
    }

    result.map(WorkerExit::Played)
}

fn playback_loop(
    reader: &mut StoreReader,
    output: &mut dyn OutputStream,
    block_samples: usize,
    channels: usize,
    stop: &StopFlag,
    played: &AtomicU64,
) -> Result<PlaybackEnd, SessionError> {
    let mut buf = vec![0i16; block_samples];

    loop {
        if stop.is_requested() {
            debug!("Playback loop observed stop, {} bytes unplayed", reader.remaining_bytes());
            return Ok(PlaybackEnd::Stopped);
        }

        let n = reader.read_frames(&mut buf).map_err(SessionError::store)?;
        if n == 0 {
            output.drain().map_err(SessionError::device_io)?;
            return Ok(PlaybackEnd::Finished);
        }

        output.write_frames(&buf[..n]).map_err(SessionError::device_io)?;
        played.fetch_add((n / channels) as u64, Ordering::SeqCst);
    }
}

// Integration tests for the record/playback session
//
// These tests drive AudioSession through the simulated backend, whose input is
// paced by the wall clock like a real microphone.

use anyhow::Result;
use duplex_recorder::audio::{AudioBackend, AudioBackendConfig, InputStream, OutputStream};
use duplex_recorder::{
    AudioSession, BackingStore, PcmFormat, SessionConfig, SessionError, SessionEvent,
    SessionState, SimulatedBackend,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;

/// 100ms device blocks at 8kHz
const RATE: u32 = 8000;
const FRAME_SAMPLES: usize = 800;

fn session_config(dir: &TempDir, rate: u32, frame_samples: usize) -> SessionConfig {
    SessionConfig {
        store_path: dir.path().join("audio_record.pcm"),
        format: PcmFormat::mono(rate),
        frame_samples,
        playback_buffer_factor: 2,
        join_timeout: Duration::from_secs(2),
    }
}

fn new_session(dir: &TempDir) -> (AudioSession, SimulatedBackend) {
    let backend = SimulatedBackend::new();
    let session = AudioSession::new(
        session_config(dir, RATE, FRAME_SAMPLES),
        Arc::new(backend.clone()),
    );
    (session, backend)
}

fn write_store(store: &BackingStore, samples: &[i16]) -> Result<()> {
    let mut writer = store.create()?;
    writer.append(samples)?;
    writer.finish()?;
    Ok(())
}

async fn wait_for<F>(events: &mut broadcast::Receiver<SessionEvent>, matches: F) -> SessionEvent
where
    F: Fn(&SessionEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if matches(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for session event")
}

#[tokio::test]
async fn test_start_then_immediate_stop_leaves_idle() -> Result<()> {
    for rate in [8000, 16000, 32000, 44100] {
        let temp_dir = TempDir::new()?;
        let backend = SimulatedBackend::new();
        let session = AudioSession::new(
            session_config(&temp_dir, rate, 256),
            Arc::new(backend.clone()),
        );

        session.start_recording().await?;
        assert_eq!(session.state(), SessionState::Recording);

        let elapsed = session.stop_recording().await?;

        assert!(elapsed >= Duration::ZERO);
        assert_eq!(session.state(), SessionState::Idle, "rate {}", rate);
        assert_eq!(backend.open_inputs(), 0, "input device should be released");
    }

    Ok(())
}

#[tokio::test]
async fn test_second_start_recording_is_busy() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let (session, _backend) = new_session(&temp_dir);

    session.start_recording().await?;
    let second = session.start_recording().await;

    assert_eq!(second, Err(SessionError::Busy("recording")));
    assert_eq!(session.state(), SessionState::Recording);

    // The first recording keeps capturing
    tokio::time::sleep(Duration::from_millis(350)).await;
    session.stop_recording().await?;
    assert!(session.store().frame_count() >= FRAME_SAMPLES as u64);

    Ok(())
}

#[tokio::test]
async fn test_playback_without_recording_fails() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let (session, backend) = new_session(&temp_dir);

    assert_eq!(session.start_playback().await, Err(SessionError::NoRecording));
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(backend.open_outputs(), 0);

    // An empty store counts as no recording
    write_store(session.store(), &[])?;
    assert_eq!(session.start_playback().await, Err(SessionError::NoRecording));

    Ok(())
}

#[tokio::test]
async fn test_recorded_bytes_match_elapsed_time() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let (session, _backend) = new_session(&temp_dir);

    session.start_recording().await?;
    tokio::time::sleep(Duration::from_secs(1)).await;
    let elapsed = session.stop_recording().await?;

    let bytes = session.store().byte_len() as f64;
    let expected = RATE as f64 * elapsed.as_secs_f64() * 2.0;
    let block_bytes = (FRAME_SAMPLES * 2) as f64;

    assert!(
        (bytes - expected).abs() <= block_bytes,
        "expected ~{} bytes for {:?}, store holds {}",
        expected,
        elapsed,
        bytes
    );
    assert_eq!(bytes as u64 % 2, 0, "store holds whole frames only");

    Ok(())
}

#[tokio::test]
async fn test_playback_ends_naturally_after_every_frame() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let (session, backend) = new_session(&temp_dir);

    // Not a multiple of the block size, so the last write is partial
    let samples: Vec<i16> = (0..12_345).map(|i| (i % 2000) as i16 - 1000).collect();
    write_store(session.store(), &samples)?;

    let mut events = session.subscribe();
    session.start_playback().await?;

    let finished = wait_for(&mut events, |e| matches!(e, SessionEvent::PlaybackFinished { .. })).await;

    match finished {
        SessionEvent::PlaybackFinished { frames, .. } => assert_eq!(frames, 12_345),
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(backend.played_samples(), samples);
    assert_eq!(backend.open_outputs(), 0, "output device should be released");
    assert_eq!(session.stats().played_frames, 12_345);

    Ok(())
}

#[tokio::test]
async fn test_stop_when_idle_is_noop() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let (session, _backend) = new_session(&temp_dir);

    assert_eq!(session.stop_recording().await?, Duration::ZERO);
    session.stop_playback().await?;
    assert_eq!(session.state(), SessionState::Idle);

    // Twice after a real take as well
    session.start_recording().await?;
    session.stop_recording().await?;
    assert_eq!(session.stop_recording().await?, Duration::ZERO);

    Ok(())
}

#[tokio::test]
async fn test_permission_denied_keeps_previous_take() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let (session, backend) = new_session(&temp_dir);
    write_store(session.store(), &[7; 1000])?;

    backend.set_capture_permission(false);

    assert_eq!(session.start_recording().await, Err(SessionError::PermissionDenied));
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(session.store().frame_count(), 1000);
    assert_eq!(backend.open_inputs(), 0);

    Ok(())
}

#[tokio::test]
async fn test_unavailable_devices() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let (session, backend) = new_session(&temp_dir);
    write_store(session.store(), &[7; 1000])?;

    backend.set_input_available(false);
    let err = session.start_recording().await.unwrap_err();
    assert!(matches!(err, SessionError::DeviceUnavailable(_)), "got {:?}", err);
    assert_eq!(session.store().frame_count(), 1000, "failed open must not truncate the store");

    backend.set_output_available(false);
    let err = session.start_playback().await.unwrap_err();
    assert!(matches!(err, SessionError::DeviceUnavailable(_)), "got {:?}", err);
    assert_eq!(session.state(), SessionState::Idle);

    Ok(())
}

#[tokio::test]
async fn test_capture_failure_returns_to_idle() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let (session, backend) = new_session(&temp_dir);
    backend.fail_input_after(2 * FRAME_SAMPLES as u64);

    let mut events = session.subscribe();
    session.start_recording().await?;

    let failed = wait_for(&mut events, |e| matches!(e, SessionEvent::WorkerFailed { .. })).await;
    match failed {
        SessionEvent::WorkerFailed { error, .. } => {
            assert!(matches!(error, SessionError::DeviceIo(_)), "got {:?}", error)
        }
        other => panic!("unexpected event {:?}", other),
    }

    assert_eq!(session.state(), SessionState::Idle);
    assert!(matches!(session.last_error(), Some(SessionError::DeviceIo(_))));
    assert!(session.stats().last_error.is_some());

    // Already idle, so stopping is the usual no-op
    assert_eq!(session.stop_recording().await?, Duration::ZERO);
    assert_eq!(backend.open_inputs(), 0);

    // Frames captured before the failure stay in the store
    assert_eq!(session.store().frame_count(), 2 * FRAME_SAMPLES as u64);

    // The next take clears the error
    backend.fail_input_after(u64::MAX);
    session.start_recording().await?;
    assert_eq!(session.last_error(), None);
    session.stop_recording().await?;

    Ok(())
}

#[tokio::test]
async fn test_playback_failure_returns_to_idle() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let (session, backend) = new_session(&temp_dir);
    write_store(session.store(), &[1; 4000])?;
    backend.fail_output_after(1600);

    let mut events = session.subscribe();
    session.start_playback().await?;

    wait_for(&mut events, |e| matches!(e, SessionEvent::WorkerFailed { .. })).await;

    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(backend.played_samples().len(), 1600);
    assert_eq!(backend.open_outputs(), 0);

    Ok(())
}

#[tokio::test]
async fn test_recording_and_playback_are_exclusive() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let (session, backend) = new_session(&temp_dir);

    session.start_recording().await?;
    assert_eq!(session.start_playback().await, Err(SessionError::Busy("recording")));
    // Stopping the other activity leaves the recording alone
    session.stop_playback().await?;
    assert_eq!(session.state(), SessionState::Recording);
    tokio::time::sleep(Duration::from_millis(250)).await;
    session.stop_recording().await?;

    backend.set_paced_output(true);
    session.start_playback().await?;
    assert_eq!(session.start_recording().await, Err(SessionError::Busy("playing")));
    assert_eq!(session.stop_recording().await?, Duration::ZERO);
    assert_eq!(session.state(), SessionState::Playing);
    session.stop_playback().await?;
    assert_eq!(session.state(), SessionState::Idle);

    Ok(())
}

#[tokio::test]
async fn test_stop_playback_mid_stream() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let (session, backend) = new_session(&temp_dir);
    backend.set_paced_output(true);

    // Two seconds of audio
    write_store(session.store(), &vec![3; 2 * RATE as usize])?;

    let mut events = session.subscribe();
    session.start_playback().await?;
    tokio::time::sleep(Duration::from_millis(300)).await;
    session.stop_playback().await?;

    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(backend.open_outputs(), 0);

    let played = backend.played_samples().len();
    assert!(played > 0 && played < 2 * RATE as usize, "played {} samples", played);

    let stopped = wait_for(&mut events, |e| {
        matches!(e, SessionEvent::PlaybackStopped { .. } | SessionEvent::PlaybackFinished { .. })
    })
    .await;
    assert!(matches!(stopped, SessionEvent::PlaybackStopped { .. }));

    Ok(())
}

#[tokio::test]
async fn test_recording_replaces_previous_store() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let (session, _backend) = new_session(&temp_dir);
    write_store(session.store(), &vec![9; 100_000])?;

    session.start_recording().await?;
    tokio::time::sleep(Duration::from_millis(250)).await;
    session.stop_recording().await?;

    let frames = session.store().frame_count();
    assert!(frames > 0 && frames < 100_000, "store holds {} frames", frames);

    Ok(())
}

#[tokio::test]
async fn test_elapsed_and_stats() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let (session, _backend) = new_session(&temp_dir);

    assert_eq!(session.elapsed(), Duration::ZERO);
    let stats = session.stats();
    assert_eq!(stats.state, SessionState::Idle);
    assert!(stats.take_id.is_none());
    assert_eq!(stats.sample_rate, RATE);
    assert_eq!(stats.channels, 1);

    let mut events = session.subscribe();
    session.start_recording().await?;
    tokio::time::sleep(Duration::from_millis(250)).await;

    let stats = session.stats();
    assert_eq!(stats.state, SessionState::Recording);
    assert!(stats.started_at.is_some());
    assert!(stats.elapsed_secs >= 0.2);
    assert!(session.elapsed() >= Duration::from_millis(250));

    let elapsed = session.stop_recording().await?;
    let stopped = wait_for(&mut events, |e| matches!(e, SessionEvent::RecordingStopped { .. })).await;
    match stopped {
        SessionEvent::RecordingStopped { elapsed: reported, frames, .. } => {
            assert_eq!(reported, elapsed);
            assert_eq!(frames, session.store().frame_count());
        }
        other => panic!("unexpected event {:?}", other),
    }

    // Elapsed keeps counting from the most recent start
    assert!(session.elapsed() >= elapsed);

    Ok(())
}

#[tokio::test]
async fn test_shutdown_stops_active_recording() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let (session, backend) = new_session(&temp_dir);

    session.start_recording().await?;
    session.shutdown().await?;

    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(backend.open_inputs(), 0);

    Ok(())
}

/// Capture device whose reads take far longer than the join timeout
#[derive(Clone, Default)]
struct StuckBackend {
    reading: Arc<AtomicBool>,
    open_inputs: Arc<AtomicUsize>,
    peak_inputs: Arc<AtomicUsize>,
}

impl StuckBackend {
    /// Wait until the capture worker is blocked inside a read
    async fn wait_until_reading(&self) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !self.reading.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("capture worker never started reading");
    }
}

struct StuckInput {
    reading: Arc<AtomicBool>,
    open_inputs: Arc<AtomicUsize>,
    closed: bool,
}

impl InputStream for StuckInput {
    fn read_frames(&mut self, buf: &mut [i16]) -> Result<usize> {
        self.reading.store(true, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(600));
        buf.fill(1);
        Ok(buf.len())
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.open_inputs.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl AudioBackend for StuckBackend {
    fn name(&self) -> &str {
        "stuck"
    }

    fn open_input(&self, _config: &AudioBackendConfig) -> Result<Box<dyn InputStream>> {
        let open = self.open_inputs.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_inputs.fetch_max(open, Ordering::SeqCst);
        Ok(Box::new(StuckInput {
            reading: Arc::clone(&self.reading),
            open_inputs: Arc::clone(&self.open_inputs),
            closed: false,
        }))
    }

    fn open_output(&self, _config: &AudioBackendConfig) -> Result<Box<dyn OutputStream>> {
        anyhow::bail!("no output")
    }
}

fn stuck_session(dir: &TempDir, backend: &StuckBackend) -> AudioSession {
    let mut config = session_config(dir, RATE, FRAME_SAMPLES);
    config.join_timeout = Duration::from_millis(100);
    AudioSession::new(config, Arc::new(backend.clone()))
}

#[tokio::test]
async fn test_hung_worker_reports_worker_hang() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let backend = StuckBackend::default();
    let session = stuck_session(&temp_dir, &backend);

    session.start_recording().await?;
    backend.wait_until_reading().await;
    let result = session.stop_recording().await;

    assert_eq!(result, Err(SessionError::WorkerHang(Duration::from_millis(100))));
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(
        session.last_error(),
        Some(SessionError::WorkerHang(Duration::from_millis(100)))
    );

    Ok(())
}

#[tokio::test]
async fn test_restart_waits_for_hung_worker_to_exit() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let backend = StuckBackend::default();
    let session = stuck_session(&temp_dir, &backend);

    session.start_recording().await?;
    backend.wait_until_reading().await;
    assert!(matches!(
        session.stop_recording().await,
        Err(SessionError::WorkerHang(_))
    ));

    // The abandoned capture still holds the device and the store
    let busy = SessionError::Busy("waiting for a hung worker to exit");
    assert_eq!(session.start_recording().await, Err(busy.clone()));
    assert_eq!(session.start_playback().await, Err(busy));
    assert_eq!(backend.open_inputs.load(Ordering::SeqCst), 1);

    // Its read returns, it sees the stop flag and exits; then starting works again
    tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            match session.start_recording().await {
                Ok(()) => break,
                Err(SessionError::Busy(_)) => tokio::time::sleep(Duration::from_millis(20)).await,
                Err(e) => panic!("unexpected error {:?}", e),
            }
        }
    })
    .await
    .expect("abandoned worker never exited");

    assert_eq!(session.state(), SessionState::Recording);
    assert_eq!(backend.peak_inputs.load(Ordering::SeqCst), 1, "never two capture devices at once");

    Ok(())
}

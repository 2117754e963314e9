use super::config::SessionConfig;
use super::stats::{SessionEvent, SessionState, SessionStats};
use super::worker::{self, PlaybackEnd, StopFlag, WorkerExit};
use crate::audio::{AudioBackend, BackingStore};
use crate::error::SessionError;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

const EVENT_CAPACITY: usize = 32;

/// Mutable session status, guarded by a short-lived lock
struct Status {
    state: SessionState,
    /// Bumped on every start; a worker only settles the session while its
    /// generation is still current
    generation: u64,
    take_id: Option<Uuid>,
    started_at: Option<Instant>,
    started_wall: Option<DateTime<Utc>>,
    last_error: Option<SessionError>,
}

/// State shared between the session and its background worker
struct Shared {
    status: StdMutex<Status>,
    /// Frames appended by the current capture
    captured_frames: AtomicU64,
    /// Frames written by the current or last playback
    played_frames: AtomicU64,
    events: broadcast::Sender<SessionEvent>,
}

impl Shared {
    fn status(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn begin(&self, state: SessionState) -> (u64, Uuid) {
        let mut status = self.status();
        status.generation += 1;
        status.state = state;
        let take_id = Uuid::new_v4();
        status.take_id = Some(take_id);
        status.started_at = Some(Instant::now());
        status.started_wall = Some(Utc::now());
        status.last_error = None;
        (status.generation, take_id)
    }

    /// Return to idle if `generation` still owns the session
    fn settle(&self, generation: u64) -> bool {
        let mut status = self.status();
        if status.generation != generation || status.state == SessionState::Idle {
            return false;
        }
        status.state = SessionState::Idle;
        true
    }

    /// Return to idle and record why the worker ended early
    fn fail(&self, generation: u64, take_id: Uuid, err: SessionError) {
        {
            let mut status = self.status();
            if status.generation != generation || status.state == SessionState::Idle {
                return;
            }
            status.state = SessionState::Idle;
            status.last_error = Some(err.clone());
        }

        error!("Take {} ended early: {}", take_id, err);
        self.emit(SessionEvent::WorkerFailed { take_id, error: err });
    }
}

/// The background worker currently attached to the session
struct Worker {
    generation: u64,
    take_id: Uuid,
    stop: StopFlag,
    handle: JoinHandle<Result<WorkerExit, SessionError>>,
}

/// A duplex record/playback session over one backing store
///
/// At most one background worker (capture or playback) runs at a time. The
/// caller talks to it only through the stop flag; stop calls wait for the
/// worker to exit so no device or store I/O happens after they return.
pub struct AudioSession {
    config: SessionConfig,
    backend: Arc<dyn AudioBackend>,
    store: BackingStore,
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
    /// Worker that outlived its join timeout; blocks new starts until it exits
    abandoned: StdMutex<Option<Worker>>,
}

impl AudioSession {
    /// Create a new idle session
    pub fn new(config: SessionConfig, backend: Arc<dyn AudioBackend>) -> Self {
        info!(
            "Creating audio session: {}Hz, {} channels, store {} (backend: {})",
            config.format.sample_rate,
            config.format.channels,
            config.store_path.display(),
            backend.name()
        );

        let store = BackingStore::new(config.store_path.clone(), config.format);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            config,
            backend,
            store,
            shared: Arc::new(Shared {
                status: StdMutex::new(Status {
                    state: SessionState::Idle,
                    generation: 0,
                    take_id: None,
                    started_at: None,
                    started_wall: None,
                    last_error: None,
                }),
                captured_frames: AtomicU64::new(0),
                played_frames: AtomicU64::new(0),
                events,
            }),
            worker: Mutex::new(None),
            abandoned: StdMutex::new(None),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn store(&self) -> &BackingStore {
        &self.store
    }

    pub fn state(&self) -> SessionState {
        self.shared.status().state
    }

    /// Time since the current or most recent recording/playback started
    pub fn elapsed(&self) -> Duration {
        self.shared
            .status()
            .started_at
            .map(|started| started.elapsed())
            .unwrap_or_default()
    }

    /// Error left behind by a background loop that ended early
    pub fn last_error(&self) -> Option<SessionError> {
        self.shared.status().last_error.clone()
    }

    /// Receive completion and failure notifications
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    /// Get current session statistics
    pub fn stats(&self) -> SessionStats {
        let status = self.shared.status();
        let elapsed = status.started_at.map(|t| t.elapsed()).unwrap_or_default();

        let recorded_frames = match status.state {
            SessionState::Recording => self.shared.captured_frames.load(Ordering::SeqCst),
            _ => self.store.frame_count(),
        };

        SessionStats {
            state: status.state,
            take_id: status.take_id,
            started_at: status.started_wall,
            elapsed_secs: elapsed.as_secs_f64(),
            recorded_frames,
            played_frames: self.shared.played_frames.load(Ordering::SeqCst),
            last_error: status.last_error.as_ref().map(|e| e.to_string()),
            sample_rate: self.config.format.sample_rate,
            channels: self.config.format.channels,
        }
    }

    /// Start capturing into a fresh backing store
    pub async fn start_recording(&self) -> Result<(), SessionError> {
        let mut slot = self.worker.lock().await;
        self.ensure_idle(&mut slot).await?;

        if !self.backend.has_capture_permission() {
            warn!("Refusing to record: capture permission not granted");
            return Err(SessionError::PermissionDenied);
        }

        // Open the device before truncating so a failed open keeps the last take
        let mut input = self
            .backend
            .open_input(&self.config.backend_config())
            .map_err(|e| {
                error!("Failed to open input device: {:#}", e);
                SessionError::device_unavailable(e)
            })?;

        let writer = match self.store.create() {
            Ok(writer) => writer,
            Err(e) => {
                if let Err(close_err) = input.close() {
                    warn!("Failed to close input device: {:#}", close_err);
                }
                return Err(SessionError::store(e));
            }
        };

        self.shared.captured_frames.store(0, Ordering::SeqCst);
        let (generation, take_id) = self.shared.begin(SessionState::Recording);
        self.shared.emit(SessionEvent::RecordingStarted { take_id });
        info!("Recording started: take {}", take_id);

        let stop = StopFlag::new();
        let worker_stop = stop.clone();
        let shared = Arc::clone(&self.shared);
        let block_samples = self.config.block_samples();
        let channels = self.config.format.channels.max(1) as usize;

        let handle = tokio::task::spawn_blocking(move || {
            info!("Capture worker started for take {}", take_id);
            let result = worker::run_capture(
                input,
                writer,
                block_samples,
                channels,
                worker_stop,
                &shared.captured_frames,
            );
            if let Err(e) = &result {
                shared.fail(generation, take_id, e.clone());
            }
            info!("Capture worker stopped for take {}", take_id);
            result
        });

        *slot = Some(Worker {
            generation,
            take_id,
            stop,
            handle,
        });

        Ok(())
    }

    /// Stop capturing and return how long the take lasted.
    ///
    /// A no-op returning zero when not recording.
    pub async fn stop_recording(&self) -> Result<Duration, SessionError> {
        let mut slot = self.worker.lock().await;
        match self.state() {
            SessionState::Recording => {}
            SessionState::Idle => {
                self.reap(&mut slot).await;
                return Ok(Duration::ZERO);
            }
            SessionState::Playing => return Ok(Duration::ZERO),
        }

        let Some(worker) = slot.take() else {
            warn!("Recording without a capture worker, resetting to idle");
            self.force_idle();
            return Ok(Duration::ZERO);
        };

        info!("Stopping recording: take {}", worker.take_id);
        let (generation, take_id) = (worker.generation, worker.take_id);
        let result = self.join(worker).await;
        let elapsed = self.elapsed();

        match result {
            Ok(exit) => {
                if self.shared.settle(generation) {
                    let bytes = match exit {
                        WorkerExit::Captured { bytes } => bytes,
                        WorkerExit::Played(_) => 0,
                    };
                    let frames = self.config.format.frames_in_bytes(bytes);
                    info!(
                        "Recording stopped: take {} ({:.2}s, {} frames)",
                        take_id,
                        elapsed.as_secs_f64(),
                        frames
                    );
                    self.shared.emit(SessionEvent::RecordingStopped {
                        take_id,
                        elapsed,
                        frames,
                    });
                }
                Ok(elapsed)
            }
            Err(e) => {
                self.shared.fail(generation, take_id, e.clone());
                Err(e)
            }
        }
    }

    /// Start playing the backing store from its beginning
    pub async fn start_playback(&self) -> Result<(), SessionError> {
        let mut slot = self.worker.lock().await;
        self.ensure_idle(&mut slot).await?;

        let frames = self.store.frame_count();
        if frames == 0 {
            warn!("Nothing to play: {} is missing or empty", self.store.path().display());
            return Err(SessionError::NoRecording);
        }

        let reader = self.store.open_reader().map_err(SessionError::store)?;
        let output = self
            .backend
            .open_output(&self.config.backend_config())
            .map_err(|e| {
                error!("Failed to open output device: {:#}", e);
                SessionError::device_unavailable(e)
            })?;

        self.shared.played_frames.store(0, Ordering::SeqCst);
        let (generation, take_id) = self.shared.begin(SessionState::Playing);
        self.shared.emit(SessionEvent::PlaybackStarted { take_id, frames });
        info!("Playback started: take {} ({} frames)", take_id, frames);

        let stop = StopFlag::new();
        let worker_stop = stop.clone();
        let shared = Arc::clone(&self.shared);
        let block_samples = self.config.block_samples();
        let channels = self.config.format.channels.max(1) as usize;

        let handle = tokio::task::spawn_blocking(move || {
            info!("Playback worker started for take {}", take_id);
            let result = worker::run_playback(
                reader,
                output,
                block_samples,
                channels,
                worker_stop,
                &shared.played_frames,
            );

            match &result {
                Ok(WorkerExit::Played(PlaybackEnd::Finished)) => {
                    if shared.settle(generation) {
                        let frames = shared.played_frames.load(Ordering::SeqCst);
                        info!("Playback finished: take {} ({} frames)", take_id, frames);
                        shared.emit(SessionEvent::PlaybackFinished { take_id, frames });
                    }
                }
                Ok(_) => {}
                Err(e) => shared.fail(generation, take_id, e.clone()),
            }
            result
        });

        *slot = Some(Worker {
            generation,
            take_id,
            stop,
            handle,
        });

        Ok(())
    }

    /// Stop playback at the next frame boundary.
    ///
    /// A no-op when not playing.
    pub async fn stop_playback(&self) -> Result<(), SessionError> {
        let mut slot = self.worker.lock().await;
        match self.state() {
            SessionState::Playing => {}
            SessionState::Idle => {
                self.reap(&mut slot).await;
                return Ok(());
            }
            SessionState::Recording => return Ok(()),
        }

        let Some(worker) = slot.take() else {
            warn!("Playing without a playback worker, resetting to idle");
            self.force_idle();
            return Ok(());
        };

        info!("Stopping playback: take {}", worker.take_id);
        let (generation, take_id) = (worker.generation, worker.take_id);

        match self.join(worker).await {
            Ok(_) => {
                if self.shared.settle(generation) {
                    let frames = self.shared.played_frames.load(Ordering::SeqCst);
                    info!("Playback stopped: take {} ({} frames)", take_id, frames);
                    self.shared.emit(SessionEvent::PlaybackStopped { take_id, frames });
                }
                Ok(())
            }
            Err(e) => {
                self.shared.fail(generation, take_id, e.clone());
                Err(e)
            }
        }
    }

    /// Stop whatever is running
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        let recording = self.stop_recording().await;
        let playback = self.stop_playback().await;
        recording?;
        playback
    }

    /// Fail with `Busy` unless idle; reap a worker that already finished
    async fn ensure_idle(&self, slot: &mut Option<Worker>) -> Result<(), SessionError> {
        match self.state() {
            SessionState::Recording => return Err(SessionError::Busy("recording")),
            SessionState::Playing => return Err(SessionError::Busy("playing")),
            SessionState::Idle => {}
        }

        self.reap(slot).await;
        self.check_abandoned()
    }

    /// Refuse to start while an abandoned worker may still hold a device or the store
    fn check_abandoned(&self) -> Result<(), SessionError> {
        let mut abandoned = self.abandoned();
        let Some(worker) = abandoned.as_ref() else {
            return Ok(());
        };

        let take_id = worker.take_id;
        if !worker.handle.is_finished() {
            warn!("Refusing to start: worker for take {} has not exited yet", take_id);
            return Err(SessionError::Busy("waiting for a hung worker to exit"));
        }

        info!("Abandoned worker for take {} has exited", take_id);
        *abandoned = None;
        Ok(())
    }

    fn abandoned(&self) -> MutexGuard<'_, Option<Worker>> {
        self.abandoned.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Collect a worker that has already settled the session.
    ///
    /// Its outcome was surfaced through `last_error` and the event channel.
    async fn reap(&self, slot: &mut Option<Worker>) {
        if let Some(worker) = slot.take() {
            let (generation, take_id) = (worker.generation, worker.take_id);
            if let Err(e) = self.join(worker).await {
                self.shared.fail(generation, take_id, e);
            }
        }
    }

    /// Signal the worker and wait, bounded, for it to exit
    async fn join(&self, mut worker: Worker) -> Result<WorkerExit, SessionError> {
        worker.stop.request();

        let timeout = self.config.join_timeout;
        let outcome = tokio::time::timeout(timeout, &mut worker.handle).await;
        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                error!("Worker for take {} panicked: {}", worker.take_id, e);
                Err(SessionError::WorkerPanicked)
            }
            Err(_) => {
                error!(
                    "Worker for take {} did not exit within {:?}, abandoning it",
                    worker.take_id, timeout
                );
                *self.abandoned() = Some(worker);
                Err(SessionError::WorkerHang(timeout))
            }
        }
    }

    fn force_idle(&self) {
        self.shared.status().state = SessionState::Idle;
    }
}

impl Drop for AudioSession {
    fn drop(&mut self) {
        // Workers cannot be joined here; make sure they wind down on their own
        if let Ok(slot) = self.worker.try_lock() {
            if let Some(worker) = slot.as_ref() {
                warn!("Audio session dropped while take {} was active", worker.take_id);
                worker.stop.request();
            }
        }
        if let Some(worker) = self.abandoned().as_ref() {
            worker.stop.request();
        }
    }
}

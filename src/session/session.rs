use super::config::{CaptureOptions, SessionConfig};
use super::media::CapturedMedia;
use super::stats::{RecordingState, SessionStats};
use crate::capture::{CaptureBackend, ChunkBuffer, ChunkRecorder, LiveStream, TrackInfo, TrackLedger};
use crate::error::CaptureError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex as SyncMutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Lifecycle events published by a capture session
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Started { tracks: Vec<TrackInfo> },
    Paused,
    Resumed,
    Stopped { size_bytes: u64, duration_ms: u64 },
    Cancelled,
    /// The host ended the capture; the session already ran its stop path
    Terminated { reason: String, media: CapturedMedia },
}

/// What `start()` hands back about the granted stream
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamInfo {
    pub mime_type: String,
    pub tracks: Vec<TrackInfo>,
}

struct ActiveCapture {
    stream: LiveStream,
    recorder: JoinHandle<()>,
    chunks: Arc<SyncMutex<ChunkBuffer>>,
    generation: u64,
}

#[derive(Default)]
struct Inner {
    state: RecordingState,
    started_at: Option<DateTime<Utc>>,
    active: Option<ActiveCapture>,
    generation: u64,
    /// Media sealed when the host ended the last capture, until collected
    terminated: Option<CapturedMedia>,
}

/// Holds the session's start slot while a grant is pending
struct StartReservation<'a>(&'a AtomicBool);

impl Drop for StartReservation<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct Shared {
    backend: Mutex<Box<dyn CaptureBackend>>,
    /// A `start()` is waiting for its grant
    starting: AtomicBool,
    ledger: Arc<TrackLedger>,
    inner: Mutex<Inner>,
    events: broadcast::Sender<SessionEvent>,
    config: SessionConfig,
}

/// A capture session that owns the live stream and accumulates its chunks.
///
/// Cheap to clone; clones share one session. The stream and its tracks are
/// never handed out, and are released on stop, cancel, host termination or
/// when the last clone is dropped.
#[derive(Clone)]
pub struct CaptureSession {
    shared: Arc<Shared>,
}

impl CaptureSession {
    pub fn new(backend: Box<dyn CaptureBackend>, config: SessionConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity);
        let ledger = backend.ledger();
        Self {
            shared: Arc::new(Shared {
                backend: Mutex::new(backend),
                starting: AtomicBool::new(false),
                ledger,
                inner: Mutex::new(Inner::default()),
                events,
                config,
            }),
        }
    }

    /// Subscribe to session lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events.subscribe()
    }

    /// Ledger of tracks started and stopped by the backend
    pub fn ledger(&self) -> Arc<TrackLedger> {
        Arc::clone(&self.shared.ledger)
    }

    /// Whether the backend can capture on this host
    pub async fn is_supported(&self) -> bool {
        self.shared.backend.lock().await.is_supported().await
    }

    pub async fn is_recording(&self) -> bool {
        self.shared.inner.lock().await.active.is_some()
    }

    /// Start recording.
    ///
    /// The session state stays readable while the host decides on the grant;
    /// a second `start()` in that window fails with `AlreadyRecording`.
    pub async fn start(&self, options: CaptureOptions) -> Result<StreamInfo, CaptureError> {
        if self.shared.starting.swap(true, Ordering::SeqCst) {
            return Err(CaptureError::AlreadyRecording);
        }
        let _reservation = StartReservation(&self.shared.starting);
        if self.shared.inner.lock().await.active.is_some() {
            return Err(CaptureError::AlreadyRecording);
        }

        let request = self.shared.config.request(&options);
        let mut stream = {
            let mut backend = self.shared.backend.lock().await;
            info!(
                "Requesting capture from {}: {}x{} @ {}fps, audio={}",
                backend.name(),
                request.width,
                request.height,
                request.frame_rate,
                request.audio
            );
            backend.request_stream(&request).await?
        };

        // From here on the tracks are live and every error path must stop them
        let Some(chunk_rx) = stream.take_chunks() else {
            stream.stop_all_tracks();
            return Err(CaptureError::Backend("stream has no chunk source".to_string()));
        };

        // Only a reserved start installs a capture, so the slot is still free
        let mut inner = self.shared.inner.lock().await;
        if inner.terminated.take().is_some() {
            warn!("Discarding a capture the host ended that was never collected");
        }
        inner.generation += 1;
        let generation = inner.generation;

        if let Some(revoked) = stream.take_revoked() {
            self.watch_revocation(revoked, generation);
        }

        let chunks = Arc::new(SyncMutex::new(ChunkBuffer::new()));
        let recorder = ChunkRecorder::spawn(chunk_rx, Arc::clone(&chunks));

        let info = StreamInfo {
            mime_type: stream.mime_type().to_string(),
            tracks: stream.tracks().iter().map(|t| t.info()).collect(),
        };

        inner.state = RecordingState::started(Instant::now());
        inner.started_at = Some(Utc::now());
        inner.active = Some(ActiveCapture {
            stream,
            recorder,
            chunks,
            generation,
        });

        let _ = self.shared.events.send(SessionEvent::Started {
            tracks: info.tracks.clone(),
        });
        info!("Capture session started ({} tracks)", info.tracks.len());

        Ok(info)
    }

    /// Pause recording. Returns false if not recording or already paused.
    pub async fn pause(&self) -> bool {
        let mut inner = self.shared.inner.lock().await;
        if !inner.state.pause(Instant::now()) {
            debug!("Pause ignored: not recording or already paused");
            return false;
        }
        if let Some(active) = &inner.active {
            active.stream.set_paused(true);
        }
        let _ = self.shared.events.send(SessionEvent::Paused);
        info!("Capture paused at {}ms", inner.state.duration_ms);
        true
    }

    /// Resume recording. Returns false if not paused.
    pub async fn resume(&self) -> bool {
        let mut inner = self.shared.inner.lock().await;
        if !inner.state.resume(Instant::now()) {
            debug!("Resume ignored: not paused");
            return false;
        }
        if let Some(active) = &inner.active {
            active.stream.set_paused(false);
        }
        let _ = self.shared.events.send(SessionEvent::Resumed);
        info!("Capture resumed ({}ms paused in total)", inner.state.total_paused_ms);
        true
    }

    /// Stop recording and seal the captured media
    pub async fn stop(&self) -> Result<CapturedMedia, CaptureError> {
        let mut inner = self.shared.inner.lock().await;
        let media = self.finish(&mut inner).await?;
        let _ = self.shared.events.send(SessionEvent::Stopped {
            size_bytes: media.size_bytes(),
            duration_ms: media.duration_ms(),
        });
        Ok(media)
    }

    /// Stop the tracks and discard everything recorded.
    /// Returns false if nothing was recording.
    pub async fn cancel(&self) -> bool {
        let mut inner = self.shared.inner.lock().await;
        let Some(mut active) = inner.active.take() else {
            return false;
        };

        let stopped = active.stream.stop_all_tracks();
        active.recorder.abort();
        let discarded = active.chunks.lock().total_bytes();

        inner.state = RecordingState::default();
        inner.started_at = None;

        let _ = self.shared.events.send(SessionEvent::Cancelled);
        info!(
            "Capture cancelled: {} tracks stopped, {} bytes discarded",
            stopped, discarded
        );
        true
    }

    /// Take the media sealed when the host ended the last capture.
    ///
    /// Kept until collected or until the next `start()`.
    pub async fn take_terminated(&self) -> Option<CapturedMedia> {
        self.shared.inner.lock().await.terminated.take()
    }

    /// Active duration so far, net of pauses
    pub async fn duration_ms(&self) -> u64 {
        self.shared.inner.lock().await.state.elapsed_ms(Instant::now())
    }

    /// Get current session statistics
    pub async fn stats(&self) -> SessionStats {
        let inner = self.shared.inner.lock().await;
        let (chunks_count, bytes_captured) = inner
            .active
            .as_ref()
            .map(|a| {
                let chunks = a.chunks.lock();
                (chunks.len(), chunks.total_bytes())
            })
            .unwrap_or((0, 0));

        SessionStats {
            is_recording: inner.active.is_some(),
            is_paused: inner.state.is_paused,
            started_at: inner.started_at,
            duration_ms: inner.state.elapsed_ms(Instant::now()),
            chunks_count,
            bytes_captured,
        }
    }

    /// Shared stop path for `stop()` and host termination
    async fn finish(&self, inner: &mut Inner) -> Result<CapturedMedia, CaptureError> {
        let Some(mut active) = inner.active.take() else {
            return Err(CaptureError::NotRecording);
        };

        let duration_ms = inner.state.refresh(Instant::now());
        let stopped = active.stream.stop_all_tracks();
        debug!("Stopped {} tracks, waiting for final chunks", stopped);

        match tokio::time::timeout(self.shared.config.flush_timeout, &mut active.recorder).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Chunk recorder task failed: {}", e),
            Err(_) => {
                warn!(
                    "Backend did not flush within {:?}, sealing what was received",
                    self.shared.config.flush_timeout
                );
                active.recorder.abort();
            }
        }

        let (buffer, chunk_count) = {
            let chunks = active.chunks.lock();
            (chunks.concat(), chunks.len())
        };
        let media = CapturedMedia::new(buffer, active.stream.mime_type(), duration_ms, chunk_count);

        inner.state = RecordingState::default();
        inner.started_at = None;

        info!(
            "Capture stopped: {}ms, {} chunks, {} bytes",
            media.duration_ms(),
            media.chunk_count(),
            media.size_bytes()
        );
        Ok(media)
    }

    fn watch_revocation(&self, revoked: oneshot::Receiver<String>, generation: u64) {
        let shared: Weak<Shared> = Arc::downgrade(&self.shared);
        tokio::spawn(async move {
            // The sender is dropped without firing when the stream ends normally
            let Ok(reason) = revoked.await else {
                return;
            };
            let Some(shared) = shared.upgrade() else {
                return;
            };
            CaptureSession { shared }.handle_revoked(reason, generation).await;
        });
    }

    async fn handle_revoked(&self, reason: String, generation: u64) {
        let mut inner = self.shared.inner.lock().await;
        match &inner.active {
            Some(active) if active.generation == generation => {}
            _ => {
                debug!("Ignoring revocation for a session that already ended");
                return;
            }
        }

        warn!("Capture ended by host: {}", reason);
        match self.finish(&mut inner).await {
            Ok(media) => {
                inner.terminated = Some(media.clone());
                let _ = self.shared.events.send(SessionEvent::Terminated { reason, media });
            }
            Err(e) => error!("Failed to finalize terminated capture: {}", e),
        }
    }
}

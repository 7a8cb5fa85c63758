use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

use super::chunk::MediaChunk;
use crate::error::CaptureError;

/// What the session asks the host capture API for
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    /// Request an audio track alongside video
    pub audio: bool,
    /// How often the backend slices the recording into chunks
    pub chunk_interval: Duration,
}

impl Default for CaptureRequest {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            frame_rate: 30,
            audio: false,
            chunk_interval: Duration::from_secs(1),
        }
    }
}

/// Kind of a live track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
}

/// Counts tracks started and stopped by a backend.
///
/// Every exit path of a capture session must leave `started == stopped`.
#[derive(Debug, Default)]
pub struct TrackLedger {
    started: AtomicUsize,
    stopped: AtomicUsize,
}

impl TrackLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn stopped(&self) -> usize {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Tracks started but not yet stopped
    pub fn live(&self) -> usize {
        self.started().saturating_sub(self.stopped())
    }
}

/// A live, independently stoppable track.
///
/// Stopping is explicit and idempotent; a track that is dropped while live
/// stops itself.
pub struct MediaTrack {
    kind: TrackKind,
    label: String,
    ledger: Arc<TrackLedger>,
    on_stop: Option<Box<dyn FnOnce() + Send>>,
}

impl MediaTrack {
    pub fn new(
        kind: TrackKind,
        label: impl Into<String>,
        ledger: Arc<TrackLedger>,
        on_stop: impl FnOnce() + Send + 'static,
    ) -> Self {
        ledger.started.fetch_add(1, Ordering::SeqCst);
        Self {
            kind,
            label: label.into(),
            ledger,
            on_stop: Some(Box::new(on_stop)),
        }
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_live(&self) -> bool {
        self.on_stop.is_some()
    }

    /// Stop the track. Returns false if it was already stopped.
    pub fn stop(&mut self) -> bool {
        match self.on_stop.take() {
            Some(on_stop) => {
                debug!("Stopping {:?} track: {}", self.kind, self.label);
                on_stop();
                self.ledger.stopped.fetch_add(1, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    pub fn info(&self) -> TrackInfo {
        TrackInfo {
            kind: self.kind,
            label: self.label.clone(),
            live: self.is_live(),
        }
    }
}

impl Drop for MediaTrack {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaTrack")
            .field("kind", &self.kind)
            .field("label", &self.label)
            .field("live", &self.is_live())
            .finish()
    }
}

/// Serializable description of a track
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackInfo {
    pub kind: TrackKind,
    pub label: String,
    pub live: bool,
}

/// A granted live stream.
///
/// Bundles the tracks, the chunk receiver, the pause switch and the
/// revocation signal a backend hands to the session.
pub struct LiveStream {
    mime_type: String,
    tracks: Vec<MediaTrack>,
    chunks: Option<mpsc::Receiver<MediaChunk>>,
    pause: watch::Sender<bool>,
    revoked: Option<oneshot::Receiver<String>>,
}

impl LiveStream {
    pub fn new(
        mime_type: impl Into<String>,
        tracks: Vec<MediaTrack>,
        chunks: mpsc::Receiver<MediaChunk>,
        pause: watch::Sender<bool>,
        revoked: oneshot::Receiver<String>,
    ) -> Self {
        Self {
            mime_type: mime_type.into(),
            tracks,
            chunks: Some(chunks),
            pause,
            revoked: Some(revoked),
        }
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn take_chunks(&mut self) -> Option<mpsc::Receiver<MediaChunk>> {
        self.chunks.take()
    }

    /// Fires with a reason when the host ends the capture on its own
    pub fn take_revoked(&mut self) -> Option<oneshot::Receiver<String>> {
        self.revoked.take()
    }

    /// While paused the backend stops feeding new data into the recording
    pub fn set_paused(&self, paused: bool) {
        self.pause.send_replace(paused);
    }

    /// Stop every live track; returns how many were stopped by this call
    pub fn stop_all_tracks(&mut self) -> usize {
        self.tracks.iter_mut().filter_map(|t| t.stop().then_some(())).count()
    }
}

/// Host capture API.
///
/// Implementations:
/// - `FfmpegScreenBackend`: screen grab through an ffmpeg subprocess
/// - `SyntheticBackend`: synthetic chunks on the tokio clock (tests, demos)
#[async_trait::async_trait]
pub trait CaptureBackend: Send + Sync {
    /// Request a capture grant and start the stream
    async fn request_stream(&mut self, request: &CaptureRequest) -> Result<LiveStream, CaptureError>;

    /// Whether this backend can capture on the current host
    async fn is_supported(&self) -> bool;

    /// Ledger of tracks started and stopped by this backend
    fn ledger(&self) -> Arc<TrackLedger>;

    /// Backend name for logging
    fn name(&self) -> &str;
}

//! Synthetic capture backend
//!
//! Emits deterministic chunks on the tokio clock, so tests can drive a
//! recording with a paused virtual clock. Also used by the demo and when
//! `capture.backend` is `synthetic` on hosts without a screen.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio::time::{interval_at, Instant};
use tracing::info;

use super::backend::{CaptureBackend, CaptureRequest, LiveStream, MediaTrack, TrackKind, TrackLedger};
use super::chunk::MediaChunk;
use crate::error::CaptureError;

/// Behaviour knobs for the synthetic backend
#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    /// Bytes emitted per full chunk interval
    pub bytes_per_chunk: usize,
    /// Refuse every capture grant
    pub deny_permission: bool,
    /// Simulate the host ending the capture after this long
    pub revoke_after: Option<Duration>,
    /// How long the host takes to answer a grant request
    pub grant_delay: Duration,
    /// MIME type reported for the stream
    pub mime_type: String,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            bytes_per_chunk: 4096,
            deny_permission: false,
            revoke_after: None,
            grant_delay: Duration::ZERO,
            mime_type: "video/webm".to_string(),
        }
    }
}

pub struct SyntheticBackend {
    config: SyntheticConfig,
    ledger: Arc<TrackLedger>,
    emitted_bytes: Arc<AtomicU64>,
    grants: AtomicUsize,
}

impl SyntheticBackend {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            ledger: TrackLedger::new(),
            emitted_bytes: Arc::new(AtomicU64::new(0)),
            grants: AtomicUsize::new(0),
        }
    }

    /// A backend whose capture grant is always refused
    pub fn denying() -> Self {
        Self::new(SyntheticConfig {
            deny_permission: true,
            ..SyntheticConfig::default()
        })
    }

    /// Total bytes pushed into chunk channels across all streams
    pub fn emitted_bytes(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.emitted_bytes)
    }
}

impl Default for SyntheticBackend {
    fn default() -> Self {
        Self::new(SyntheticConfig::default())
    }
}

#[async_trait::async_trait]
impl CaptureBackend for SyntheticBackend {
    async fn request_stream(&mut self, request: &CaptureRequest) -> Result<LiveStream, CaptureError> {
        if !self.config.grant_delay.is_zero() {
            tokio::time::sleep(self.config.grant_delay).await;
        }
        if self.config.deny_permission {
            return Err(CaptureError::PermissionDenied(
                "synthetic backend refuses capture".to_string(),
            ));
        }

        let grant = self.grants.fetch_add(1, Ordering::SeqCst);
        info!(
            "Synthetic capture granted (#{}): {}x{} @ {}fps, audio={}",
            grant, request.width, request.height, request.frame_rate, request.audio
        );

        let live_tracks = Arc::new(AtomicUsize::new(0));
        let all_stopped = Arc::new(Notify::new());

        let mut kinds = vec![TrackKind::Video];
        if request.audio {
            kinds.push(TrackKind::Audio);
        }

        let tracks = kinds
            .into_iter()
            .map(|kind| {
                live_tracks.fetch_add(1, Ordering::SeqCst);
                let live_tracks = Arc::clone(&live_tracks);
                let all_stopped = Arc::clone(&all_stopped);
                MediaTrack::new(
                    kind,
                    format!("synthetic-{:?}-{}", kind, grant).to_lowercase(),
                    Arc::clone(&self.ledger),
                    move || {
                        if live_tracks.fetch_sub(1, Ordering::SeqCst) == 1 {
                            all_stopped.notify_one();
                        }
                    },
                )
            })
            .collect();

        let (chunk_tx, chunk_rx) = mpsc::channel(64);
        let (pause_tx, pause_rx) = watch::channel(false);
        let (revoke_tx, revoke_rx) = oneshot::channel();

        tokio::spawn(produce(
            chunk_tx,
            pause_rx,
            revoke_tx,
            all_stopped,
            request.chunk_interval,
            self.config.bytes_per_chunk,
            self.config.revoke_after,
            Arc::clone(&self.emitted_bytes),
        ));

        Ok(LiveStream::new(
            self.config.mime_type.clone(),
            tracks,
            chunk_rx,
            pause_tx,
            revoke_rx,
        ))
    }

    async fn is_supported(&self) -> bool {
        true
    }

    fn ledger(&self) -> Arc<TrackLedger> {
        Arc::clone(&self.ledger)
    }

    fn name(&self) -> &str {
        "synthetic"
    }
}

#[allow(clippy::too_many_arguments)]
async fn produce(
    chunk_tx: mpsc::Sender<MediaChunk>,
    pause_rx: watch::Receiver<bool>,
    revoke_tx: oneshot::Sender<String>,
    all_stopped: Arc<Notify>,
    chunk_interval: Duration,
    bytes_per_chunk: usize,
    revoke_after: Option<Duration>,
    emitted_bytes: Arc<AtomicU64>,
) {
    let started = Instant::now();
    let mut ticker = interval_at(started + chunk_interval, chunk_interval);
    let mut revoke_tx = Some(revoke_tx);
    let revoke_deadline = revoke_after.map(|after| started + after);
    let mut index = 0u64;
    let mut last_emit = started;

    let mut emit = |len: usize, now: Instant| {
        let chunk = MediaChunk {
            index,
            data: vec![(index % 251) as u8; len],
            timestamp_ms: now.duration_since(started).as_millis() as u64,
        };
        index += 1;
        chunk
    };

    loop {
        tokio::select! {
            _ = all_stopped.notified() => break,
            _ = async {
                match revoke_deadline {
                    Some(deadline) if revoke_tx.is_some() => tokio::time::sleep_until(deadline).await,
                    _ => std::future::pending::<()>().await,
                }
            } => {
                if let Some(tx) = revoke_tx.take() {
                    info!("Synthetic capture revoked by host");
                    let _ = tx.send("capture ended by host".to_string());
                }
            }
            now = ticker.tick() => {
                last_emit = now;
                if *pause_rx.borrow() {
                    continue;
                }
                let chunk = emit(bytes_per_chunk, now);
                let len = chunk.len() as u64;
                if chunk_tx.send(chunk).await.is_err() {
                    break;
                }
                emitted_bytes.fetch_add(len, Ordering::SeqCst);
            }
        }
    }

    // Flush the partial slice recorded since the last tick
    let now = Instant::now();
    let since_last = now.duration_since(last_emit);
    let tail = (bytes_per_chunk as u128 * since_last.as_millis()
        / chunk_interval.as_millis().max(1)) as usize;
    if tail > 0 && !*pause_rx.borrow() {
        let chunk = emit(tail, now);
        let len = chunk.len() as u64;
        if chunk_tx.send(chunk).await.is_ok() {
            emitted_bytes.fetch_add(len, Ordering::SeqCst);
        }
    }
}

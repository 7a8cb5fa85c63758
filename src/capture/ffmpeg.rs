//! Screen capture through an ffmpeg subprocess
//!
//! ffmpeg grabs the display and writes MPEG-TS to stdout. MPEG-TS is made of
//! fixed 188-byte packets, so slices can be dropped at packet boundaries
//! while paused and the concatenated chunks stay decodable.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::backend::{CaptureBackend, CaptureRequest, LiveStream, MediaTrack, TrackKind, TrackLedger};
use super::chunk::MediaChunk;
use crate::error::CaptureError;

const TS_PACKET_SIZE: usize = 188;
const READ_BLOCK: usize = TS_PACKET_SIZE * 64;
/// How long ffmpeg gets to report a refused grab before we call it granted
const STARTUP_GRACE: Duration = Duration::from_millis(750);
const GRACEFUL_STOP_TIMEOUT: Duration = Duration::from_secs(3);

pub const MPEG_TS_MIME: &str = "video/mp2t";

/// Platform grab device
#[derive(Debug, Clone)]
pub struct GrabInput {
    /// ffmpeg input format (x11grab, avfoundation, gdigrab)
    pub format: String,
    /// Device or display identifier
    pub device: String,
    /// Audio input format and device, if the platform has one
    pub audio: Option<(String, String)>,
}

impl GrabInput {
    /// Default grab device for the current platform
    pub fn for_platform(display: &str) -> Self {
        if cfg!(target_os = "macos") {
            Self {
                format: "avfoundation".to_string(),
                device: if display.is_empty() { "1".to_string() } else { display.to_string() },
                audio: Some(("avfoundation".to_string(), ":0".to_string())),
            }
        } else if cfg!(target_os = "windows") {
            Self {
                format: "gdigrab".to_string(),
                device: "desktop".to_string(),
                audio: None,
            }
        } else {
            Self {
                format: "x11grab".to_string(),
                device: if display.is_empty() { ":0.0".to_string() } else { display.to_string() },
                audio: Some(("pulse".to_string(), "default".to_string())),
            }
        }
    }
}

pub struct FfmpegScreenBackend {
    ffmpeg: PathBuf,
    input: GrabInput,
    ledger: Arc<TrackLedger>,
}

impl FfmpegScreenBackend {
    pub fn new(ffmpeg: impl Into<PathBuf>, input: GrabInput) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            input,
            ledger: TrackLedger::new(),
        }
    }

    fn build_args(&self, request: &CaptureRequest) -> Vec<String> {
        let mut args = vec![
            "-hide_banner".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-f".to_string(),
            self.input.format.clone(),
            "-framerate".to_string(),
            request.frame_rate.to_string(),
            "-video_size".to_string(),
            format!("{}x{}", request.width, request.height),
            "-i".to_string(),
            self.input.device.clone(),
        ];

        let with_audio = request.audio && self.input.audio.is_some();
        if let (true, Some((format, device))) = (with_audio, &self.input.audio) {
            args.extend(["-f".to_string(), format.clone(), "-i".to_string(), device.clone()]);
        }

        args.extend([
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            "ultrafast".to_string(),
            "-tune".to_string(),
            "zerolatency".to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
        ]);

        if with_audio {
            args.extend(["-c:a".to_string(), "aac".to_string(), "-b:a".to_string(), "128k".to_string()]);
        } else {
            args.push("-an".to_string());
        }

        args.extend(["-f".to_string(), "mpegts".to_string(), "pipe:1".to_string()]);
        args
    }
}

#[async_trait::async_trait]
impl CaptureBackend for FfmpegScreenBackend {
    async fn request_stream(&mut self, request: &CaptureRequest) -> Result<LiveStream, CaptureError> {
        if !self.is_supported().await {
            return Err(CaptureError::Unsupported(format!(
                "ffmpeg not found at {:?}",
                self.ffmpeg
            )));
        }

        let args = self.build_args(request);
        info!("Starting ffmpeg screen capture: {:?}", args);

        let mut child = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::PermissionDenied => CaptureError::PermissionDenied(e.to_string()),
                _ => CaptureError::Backend(format!("Failed to start ffmpeg: {}", e)),
            })?;

        // A refused grab makes ffmpeg exit almost immediately
        tokio::time::sleep(STARTUP_GRACE).await;
        if let Some(status) = child.try_wait()? {
            let mut stderr = String::new();
            if let Some(mut pipe) = child.stderr.take() {
                let _ = pipe.read_to_string(&mut stderr).await;
            }
            let reason = stderr.trim().to_string();
            warn!("ffmpeg capture exited during startup ({}): {}", status, reason);
            return Err(classify_startup_failure(&reason));
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CaptureError::Backend("Failed to capture ffmpeg stdout".to_string()))?;

        let (chunk_tx, chunk_rx) = mpsc::channel(64);
        let (pause_tx, pause_rx) = watch::channel(false);
        let (revoke_tx, revoke_rx) = oneshot::channel();
        let (stop_tx, stop_rx) = watch::channel(false);

        let mut kinds = vec![TrackKind::Video];
        if request.audio && self.input.audio.is_some() {
            kinds.push(TrackKind::Audio);
        }
        let live_tracks = Arc::new(AtomicUsize::new(kinds.len()));
        let stop_tx = Arc::new(stop_tx);
        let tracks = kinds
            .into_iter()
            .map(|kind| {
                let live_tracks = Arc::clone(&live_tracks);
                let stop_tx = Arc::clone(&stop_tx);
                MediaTrack::new(
                    kind,
                    format!("{}:{:?}", self.input.device, kind).to_lowercase(),
                    Arc::clone(&self.ledger),
                    move || {
                        // One process carries every track; it ends with the last one
                        if live_tracks.fetch_sub(1, Ordering::SeqCst) == 1 {
                            stop_tx.send_replace(true);
                        }
                    },
                )
            })
            .collect();

        tokio::spawn(read_slices(stdout, chunk_tx, pause_rx, request.chunk_interval));
        tokio::spawn(supervise(child, stop_rx, revoke_tx));

        Ok(LiveStream::new(MPEG_TS_MIME, tracks, chunk_rx, pause_tx, revoke_rx))
    }

    async fn is_supported(&self) -> bool {
        Command::new(&self.ffmpeg)
            .arg("-version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn ledger(&self) -> Arc<TrackLedger> {
        Arc::clone(&self.ledger)
    }

    fn name(&self) -> &str {
        "ffmpeg screen grab"
    }
}

fn classify_startup_failure(reason: &str) -> CaptureError {
    let lower = reason.to_lowercase();
    if lower.contains("permission denied")
        || lower.contains("not authorized")
        || lower.contains("cannot open display")
    {
        CaptureError::PermissionDenied(reason.to_string())
    } else {
        CaptureError::Backend(format!("ffmpeg capture failed to start: {}", reason))
    }
}

/// Cuts ffmpeg output into slices of whole TS packets
#[derive(Debug, Default)]
struct PacketSlicer {
    /// Leading bytes of a packet not fully read yet
    partial: Vec<u8>,
    slice: Vec<u8>,
}

impl PacketSlicer {
    /// Feed bytes read from ffmpeg. Completed packets join the current
    /// slice, or are dropped while paused.
    fn push(&mut self, data: &[u8], paused: bool) {
        self.partial.extend_from_slice(data);
        let whole = self.partial.len() - self.partial.len() % TS_PACKET_SIZE;
        let packets = self.partial.drain(..whole);
        if paused {
            drop(packets);
        } else {
            self.slice.extend(packets);
        }
    }

    /// Take the slice collected since the last call
    fn take_slice(&mut self) -> Option<Vec<u8>> {
        if self.slice.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.slice))
    }
}

/// Read stdout and emit one chunk per interval
async fn read_slices(
    mut stdout: ChildStdout,
    chunk_tx: mpsc::Sender<MediaChunk>,
    pause_rx: watch::Receiver<bool>,
    chunk_interval: Duration,
) {
    let started = Instant::now();
    let mut ticker = tokio::time::interval_at(started + chunk_interval, chunk_interval);
    let mut block = vec![0u8; READ_BLOCK];
    let mut slicer = PacketSlicer::default();
    let mut index = 0u64;

    let mut flush = |slicer: &mut PacketSlicer| -> Option<MediaChunk> {
        let data = slicer.take_slice()?;
        let chunk = MediaChunk {
            index,
            data,
            timestamp_ms: started.elapsed().as_millis() as u64,
        };
        index += 1;
        Some(chunk)
    };

    loop {
        tokio::select! {
            read = stdout.read(&mut block) => {
                match read {
                    Ok(0) => break,
                    Ok(n) => {
                        let paused = *pause_rx.borrow();
                        slicer.push(&block[..n], paused);
                    }
                    Err(e) => {
                        error!("Failed to read ffmpeg output: {}", e);
                        break;
                    }
                }
            }
            _ = ticker.tick() => {
                if let Some(chunk) = flush(&mut slicer) {
                    if chunk_tx.send(chunk).await.is_err() {
                        return;
                    }
                }
            }
        }
    }

    if let Some(chunk) = flush(&mut slicer) {
        let _ = chunk_tx.send(chunk).await;
    }
    debug!("ffmpeg capture output closed");
}

/// Own the child process: stop it when the tracks stop, report it when it
/// exits on its own.
async fn supervise(mut child: Child, mut stop_rx: watch::Receiver<bool>, revoke_tx: oneshot::Sender<String>) {
    tokio::select! {
        status = child.wait() => {
            let reason = match status {
                Ok(status) => format!("ffmpeg capture exited ({})", status),
                Err(e) => format!("ffmpeg capture failed: {}", e),
            };
            warn!("{}", reason);
            let _ = revoke_tx.send(reason);
        }
        // Release the watch guard before the body awaits
        _ = async { let _ = stop_rx.wait_for(|stopped| *stopped).await; } => {
            info!("Stopping ffmpeg capture");
            if let Some(mut stdin) = child.stdin.take() {
                let _ = stdin.write_all(b"q").await;
            }
            match tokio::time::timeout(GRACEFUL_STOP_TIMEOUT, child.wait()).await {
                Ok(Ok(status)) => debug!("ffmpeg capture finished ({})", status),
                Ok(Err(e)) => error!("Failed to wait for ffmpeg: {}", e),
                Err(_) => {
                    warn!("ffmpeg did not stop gracefully, killing it");
                    let _ = child.kill().await;
                }
            }
        }
    }
}

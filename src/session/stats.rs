use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Timing state of a recording.
///
/// Only `CaptureSession` mutates this, through its lifecycle methods.
#[derive(Debug, Clone, Default)]
pub struct RecordingState {
    pub is_recording: bool,
    pub is_paused: bool,
    /// Active duration as of the last refresh
    pub duration_ms: u64,
    pub start_time: Option<Instant>,
    pub pause_time: Option<Instant>,
    pub total_paused_ms: u64,
}

impl RecordingState {
    pub fn started(now: Instant) -> Self {
        Self {
            is_recording: true,
            start_time: Some(now),
            ..Self::default()
        }
    }

    /// `(now - start) - total paused - current pause span`
    pub fn elapsed_ms(&self, now: Instant) -> u64 {
        let Some(start) = self.start_time else {
            return 0;
        };
        let gross = now.saturating_duration_since(start).as_millis() as u64;
        let current_pause = self
            .pause_time
            .map(|p| now.saturating_duration_since(p).as_millis() as u64)
            .unwrap_or(0);
        gross.saturating_sub(self.total_paused_ms + current_pause)
    }

    pub fn refresh(&mut self, now: Instant) -> u64 {
        self.duration_ms = self.elapsed_ms(now);
        self.duration_ms
    }

    /// Returns false when there is nothing to pause
    pub fn pause(&mut self, now: Instant) -> bool {
        if !self.is_recording || self.is_paused {
            return false;
        }
        self.pause_time = Some(now);
        self.is_paused = true;
        self.refresh(now);
        true
    }

    /// Returns false when not paused
    pub fn resume(&mut self, now: Instant) -> bool {
        let Some(paused_at) = self.pause_time.take() else {
            return false;
        };
        self.total_paused_ms += now.saturating_duration_since(paused_at).as_millis() as u64;
        self.is_paused = false;
        self.refresh(now);
        true
    }
}

/// Statistics about a capture session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    /// Whether recording is currently active
    pub is_recording: bool,

    pub is_paused: bool,

    /// When the recording started
    pub started_at: Option<DateTime<Utc>>,

    /// Active duration in milliseconds, net of pauses
    pub duration_ms: u64,

    /// Number of chunks recorded so far
    pub chunks_count: usize,

    pub bytes_captured: u64,
}

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::capture::CaptureRequest;

/// Options a caller passes to `CaptureSession::start`
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptureOptions {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub want_audio: bool,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            frame_rate: 30,
            want_audio: false,
        }
    }
}

/// Configuration for a capture session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Interval at which the backend slices the recording into chunks
    /// Default: 1 second
    pub chunk_interval: Duration,

    /// How long `stop()` waits for the backend to flush its final chunks
    pub flush_timeout: Duration,

    /// Capacity of the session event channel
    pub event_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            chunk_interval: Duration::from_secs(1),
            flush_timeout: Duration::from_secs(5),
            event_capacity: 32,
        }
    }
}

impl SessionConfig {
    pub(crate) fn request(&self, options: &CaptureOptions) -> CaptureRequest {
        CaptureRequest {
            width: options.width,
            height: options.height,
            frame_rate: options.frame_rate,
            audio: options.want_audio,
            chunk_interval: self.chunk_interval,
        }
    }
}

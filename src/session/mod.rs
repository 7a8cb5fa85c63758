//! Capture session management
//!
//! This module provides the `CaptureSession` abstraction that manages:
//! - The live stream granted by a capture backend
//! - Chunk accumulation into a durable buffer
//! - Pause/resume timing and duration accounting
//! - Release of every track on stop, cancel and host termination

mod config;
mod media;
mod session;
mod stats;

pub use config::{CaptureOptions, SessionConfig};
pub use media::CapturedMedia;
pub use session::{CaptureSession, SessionEvent, StreamInfo};
pub use stats::{RecordingState, SessionStats};

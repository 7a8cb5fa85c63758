pub mod backend;
pub mod chunk;
pub mod ffmpeg;
pub mod synthetic;

pub use backend::{CaptureBackend, CaptureRequest, LiveStream, MediaTrack, TrackInfo, TrackKind, TrackLedger};
pub use chunk::{ChunkBuffer, ChunkRecorder, MediaChunk};
pub use ffmpeg::{FfmpegScreenBackend, GrabInput};
pub use synthetic::{SyntheticBackend, SyntheticConfig};

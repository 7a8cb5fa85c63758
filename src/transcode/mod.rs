//! Isolated transcoding: codec seam, lazy loader, ffmpeg adapter and the
//! engine thread that ties them to the message protocol.

pub mod codec;
pub mod engine;
pub mod ffmpeg;
pub mod loader;
pub mod messages;
pub mod options;
pub mod probe;

pub use codec::{Codec, CodecLoader, ProgressReporter, TranscodeJob, TranscodeOutput, Workspace};
pub use engine::{EngineHandle, EngineSettings, TranscodeEngine};
pub use ffmpeg::{FfmpegCodec, FfmpegLoader};
pub use loader::{CodecSlot, LoadState};
pub use messages::{EngineRequest, EngineResponse, SourceMedia, WireOptions, WireResult};
pub use options::{
    ConversionOptions, ConversionOutcome, ConversionProgress, ConversionResult, OutputFormat, Preset, ProgressStage,
};

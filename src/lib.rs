pub mod capture;
pub mod config;
pub mod conversion;
pub mod error;
pub mod http;
pub mod pipeline;
pub mod session;
pub mod transcode;

pub use capture::{
    CaptureBackend, CaptureRequest, FfmpegScreenBackend, GrabInput, LiveStream, MediaChunk, MediaTrack,
    SyntheticBackend, SyntheticConfig, TrackKind, TrackLedger,
};
pub use config::Config;
pub use conversion::{ConversionCoordinator, CoordinatorConfig, CoordinatorState};
pub use error::{CaptureError, ConversionError, EngineError, ErrorCode, PipelineError};
pub use http::{create_router, AppState};
pub use pipeline::{
    Artifact, ArtifactRole, ArtifactSink, DeliveryReport, DeliveryRequest, DirectorySink, PipelineDefaults,
    PipelineOrchestrator, StoredArtifact,
};
pub use session::{CaptureOptions, CaptureSession, CapturedMedia, SessionConfig, SessionEvent, SessionStats, StreamInfo};
pub use transcode::{
    ConversionOptions, ConversionOutcome, ConversionProgress, ConversionResult, EngineHandle, EngineRequest,
    EngineResponse, EngineSettings, FfmpegLoader, OutputFormat, Preset, SourceMedia, TranscodeEngine,
};

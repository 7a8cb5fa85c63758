//! Error taxonomy for the capture and conversion pipeline.

use std::time::Duration;
use thiserror::Error;

/// Errors raised by a capture session or its backend
#[derive(Error, Debug)]
pub enum CaptureError {
    /// The host refused the capture grant. Not retried.
    #[error("Capture permission denied: {0}")]
    PermissionDenied(String),

    #[error("A capture session is already recording")]
    AlreadyRecording,

    #[error("No capture session is recording")]
    NotRecording,

    /// The backend cannot capture on this host at all
    #[error("Capture not supported: {0}")]
    Unsupported(String),

    #[error("Capture backend error: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised inside the transcode engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Transcoder did not finish loading within {0:?}")]
    LoadTimeout(Duration),

    #[error("Transcoder failed to load: {0}")]
    LoadFailed(String),

    #[error("Transcode failed: {0}")]
    TranscodeFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Wire error code carried by `error` responses
    pub fn code(&self) -> ErrorCode {
        match self {
            EngineError::LoadTimeout(_) => ErrorCode::LoadTimeout,
            EngineError::LoadFailed(_) => ErrorCode::LoadFailed,
            EngineError::TranscodeFailed(_) | EngineError::Io(_) => ErrorCode::TranscodeFailed,
        }
    }
}

/// Machine-readable error code in the engine protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    #[default]
    TranscodeFailed,
    LoadTimeout,
    LoadFailed,
    Busy,
}

/// Errors surfaced to callers of the conversion coordinator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConversionError {
    /// Another conversion is in flight; wait for it or cancel it first
    #[error("A conversion is already in progress")]
    ConversionInProgress,

    /// Retryable by the caller on a later call
    #[error("Transcode engine did not load in time")]
    EngineLoadTimeout,

    #[error("Transcode engine failed to load: {0}")]
    EngineLoadFailed(String),

    #[error("Transcode failed: {0}")]
    TranscodeFailed(String),

    #[error("Invalid conversion options: {0}")]
    InvalidOptions(String),

    /// The isolated engine context is gone (thread exited or never started)
    #[error("Transcode engine is unavailable")]
    EngineUnavailable,
}

impl ConversionError {
    pub(crate) fn from_wire(code: ErrorCode, message: String) -> Self {
        match code {
            ErrorCode::LoadTimeout => ConversionError::EngineLoadTimeout,
            ErrorCode::LoadFailed => ConversionError::EngineLoadFailed(message),
            ErrorCode::Busy => ConversionError::ConversionInProgress,
            ErrorCode::TranscodeFailed => ConversionError::TranscodeFailed(message),
        }
    }
}

/// Errors from the capture-to-artifact pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error("Artifact sink failed: {0}")]
    Sink(String),
}

impl From<PipelineError> for String {
    fn from(e: PipelineError) -> String {
        e.to_string()
    }
}

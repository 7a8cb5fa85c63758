//! Messages exchanged with the transcode engine.
//!
//! Every message carries the id of the conversion it belongs to. Binary
//! payloads are base64 in serialized form.

use super::options::{
    format_scale, parse_scale, ConversionOptions, ConversionProgress, OutputFormat, Preset, ProgressStage,
};
use crate::error::ErrorCode;
use serde::{Deserialize, Serialize};

/// Source media handed to the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMedia {
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    pub mime_type: String,
    /// Duration known to the capturer, used when the container has none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Conversion options as they travel on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireOptions {
    pub preset: Preset,
    pub crf: u8,
    /// `"WxH"` or null
    pub scale: Option<String>,
    pub preserve_audio: bool,
    pub format: OutputFormat,
}

impl From<ConversionOptions> for WireOptions {
    fn from(options: ConversionOptions) -> Self {
        Self {
            preset: options.preset,
            crf: options.quality_level,
            scale: options.target_scale.map(format_scale),
            preserve_audio: options.preserve_audio,
            format: options.format,
        }
    }
}

impl TryFrom<WireOptions> for ConversionOptions {
    type Error = String;

    fn try_from(wire: WireOptions) -> Result<Self, Self::Error> {
        let target_scale = wire.scale.as_deref().map(parse_scale).transpose()?;
        let options = ConversionOptions {
            preset: wire.preset,
            quality_level: wire.crf,
            target_scale,
            preserve_audio: wire.preserve_audio,
            format: wire.format,
        };
        options.validate()?;
        Ok(options)
    }
}

/// Converted media returned by the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireResult {
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    pub mime_type: String,
    pub size_bytes: u64,
    pub elapsed_ms: u64,
}

/// Caller to engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EngineRequest {
    Convert {
        id: String,
        source: SourceMedia,
        options: WireOptions,
    },
    /// Abort the running job and tear the codec down
    Cancel { id: String },
    /// Load the codec without converting anything
    Load { id: String },
}

impl EngineRequest {
    pub fn id(&self) -> &str {
        match self {
            EngineRequest::Convert { id, .. } | EngineRequest::Cancel { id } | EngineRequest::Load { id } => id,
        }
    }
}

/// Engine to caller
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum EngineResponse {
    Progress {
        id: String,
        /// Percent complete, 0..=100
        progress: u8,
        stage: ProgressStage,
        message: String,
    },
    Success {
        id: String,
        result: WireResult,
    },
    Error {
        id: String,
        message: String,
        #[serde(default)]
        code: ErrorCode,
    },
    /// Teardown finished; `id` is the id of the cancel request
    Cancelled { id: String },
    Loaded { id: String },
}

impl EngineResponse {
    pub fn id(&self) -> &str {
        match self {
            EngineResponse::Progress { id, .. }
            | EngineResponse::Success { id, .. }
            | EngineResponse::Error { id, .. }
            | EngineResponse::Cancelled { id }
            | EngineResponse::Loaded { id } => id,
        }
    }

    /// Whether this is the last message for its id
    pub fn is_terminal(&self) -> bool {
        !matches!(self, EngineResponse::Progress { .. })
    }

    pub fn progress(id: impl Into<String>, progress: ConversionProgress) -> Self {
        EngineResponse::Progress {
            id: id.into(),
            progress: progress.percent,
            stage: progress.stage,
            message: progress.message,
        }
    }

    pub fn error(id: impl Into<String>, message: impl Into<String>, code: ErrorCode) -> Self {
        EngineResponse::Error {
            id: id.into(),
            message: message.into(),
            code,
        }
    }
}

mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

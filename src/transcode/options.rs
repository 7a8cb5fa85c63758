//! Conversion options, progress and results

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Delivery container/codec family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Webm,
    Mp4,
    Gif,
    /// MPEG transport stream, the native format of the ffmpeg screen grab
    Ts,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Webm => "webm",
            OutputFormat::Mp4 => "mp4",
            OutputFormat::Gif => "gif",
            OutputFormat::Ts => "ts",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            OutputFormat::Webm => "video/webm",
            OutputFormat::Mp4 => "video/mp4",
            OutputFormat::Gif => "image/gif",
            OutputFormat::Ts => "video/mp2t",
        }
    }

    /// FFmpeg video encoder for this format
    pub fn video_codec(&self) -> &'static str {
        match self {
            OutputFormat::Webm => "libvpx-vp9",
            OutputFormat::Mp4 | OutputFormat::Ts => "libx264",
            OutputFormat::Gif => "gif",
        }
    }

    pub fn supports_audio(&self) -> bool {
        !matches!(self, OutputFormat::Gif)
    }

    /// Match a MIME type, ignoring codec parameters (`video/webm;codecs=vp9`)
    pub fn from_mime(mime: &str) -> Option<Self> {
        let base = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        match base.as_str() {
            "video/webm" => Some(OutputFormat::Webm),
            "video/mp4" => Some(OutputFormat::Mp4),
            "image/gif" => Some(OutputFormat::Gif),
            "video/mp2t" => Some(OutputFormat::Ts),
            _ => None,
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "webm" => Ok(OutputFormat::Webm),
            "mp4" => Ok(OutputFormat::Mp4),
            "gif" => Ok(OutputFormat::Gif),
            "ts" => Ok(OutputFormat::Ts),
            other => Err(format!("unknown output format: {}", other)),
        }
    }
}

/// Speed versus compression-efficiency knob
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    Fastest,
    Fast,
    Balanced,
}

impl Preset {
    /// x264 preset name
    pub fn x264(&self) -> &'static str {
        match self {
            Preset::Fastest => "ultrafast",
            Preset::Fast => "veryfast",
            Preset::Balanced => "medium",
        }
    }

    /// libvpx `-deadline` and `-cpu-used`
    pub fn vp9(&self) -> (&'static str, u8) {
        match self {
            Preset::Fastest => ("realtime", 8),
            Preset::Fast => ("realtime", 5),
            Preset::Balanced => ("good", 2),
        }
    }
}

impl FromStr for Preset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fastest" => Ok(Preset::Fastest),
            "fast" => Ok(Preset::Fast),
            "balanced" => Ok(Preset::Balanced),
            other => Err(format!("unknown preset: {}", other)),
        }
    }
}

pub const MAX_QUALITY_LEVEL: u8 = 51;

/// Conversion option bag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConversionOptions {
    pub preset: Preset,
    /// CRF, 0..=51; lower = higher quality, larger output
    pub quality_level: u8,
    /// Output size; `None` keeps the source size
    pub target_scale: Option<(i32, i32)>,
    /// Copy audio unchanged instead of dropping it
    pub preserve_audio: bool,
    pub format: OutputFormat,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            preset: Preset::Fast,
            quality_level: 23,
            target_scale: None,
            preserve_audio: true,
            format: OutputFormat::Mp4,
        }
    }
}

impl ConversionOptions {
    pub fn validate(&self) -> Result<(), String> {
        if self.quality_level > MAX_QUALITY_LEVEL {
            return Err(format!(
                "quality level {} is outside 0..={}",
                self.quality_level, MAX_QUALITY_LEVEL
            ));
        }
        if let Some((w, h)) = self.target_scale {
            if w == 0 || h == 0 || w < -2 || h < -2 {
                return Err(format!("invalid target scale {}x{}", w, h));
            }
        }
        Ok(())
    }
}

/// Format a scale as `WxH` for the wire
pub fn format_scale(scale: (i32, i32)) -> String {
    format!("{}x{}", scale.0, scale.1)
}

/// Parse a `WxH` scale; `-1`/`-2` keep the aspect ratio
pub fn parse_scale(s: &str) -> Result<(i32, i32), String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("scale must be WxH, got {:?}", s))?;
    let w = w.trim().parse::<i32>().map_err(|e| format!("bad scale width {:?}: {}", w, e))?;
    let h = h.trim().parse::<i32>().map_err(|e| format!("bad scale height {:?}: {}", h, e))?;
    Ok((w, h))
}

/// Conversion progress stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressStage {
    Loading,
    Converting,
    Finalizing,
}

/// Progress report for one conversion
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionProgress {
    pub stage: ProgressStage,
    /// 0..=100, non-decreasing within one conversion
    pub percent: u8,
    pub message: String,
}

impl ConversionProgress {
    pub fn loading() -> Self {
        Self {
            stage: ProgressStage::Loading,
            percent: 0,
            message: "Loading transcoder".to_string(),
        }
    }

    pub fn converting(percent: u8) -> Self {
        Self {
            stage: ProgressStage::Converting,
            percent: percent.min(100),
            message: format!("Converting: {}%", percent.min(100)),
        }
    }

    pub fn finalizing() -> Self {
        Self {
            stage: ProgressStage::Finalizing,
            percent: 100,
            message: "Finalizing".to_string(),
        }
    }
}

/// A finished conversion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionResult {
    pub buffer: Vec<u8>,
    pub elapsed_ms: u64,
    pub size_bytes: u64,
    pub mime_type: String,
}

/// Terminal outcome of a conversion that did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionOutcome {
    Completed(ConversionResult),
    /// Cancelled by the caller; not a failure
    Cancelled,
}

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::capture::{CaptureBackend, FfmpegScreenBackend, GrabInput, SyntheticBackend, SyntheticConfig};
use crate::conversion::CoordinatorConfig;
use crate::pipeline::PipelineDefaults;
use crate::session::{CaptureOptions, SessionConfig};
use crate::transcode::{CodecLoader, ConversionOptions, EngineSettings, FfmpegLoader, OutputFormat, Preset};

pub const ENV_PREFIX: &str = "TYPECAST";

#[derive(Debug, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub capture: CaptureConfig,
    pub transcode: TranscodeConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Deserialize)]
pub struct CaptureConfig {
    /// `synthetic` or `ffmpeg`
    pub backend: String,
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub audio: bool,
    pub chunk_interval_ms: u64,
    pub flush_timeout_ms: u64,
    /// Grab device; empty picks the platform default
    pub display: String,
    pub ffmpeg_path: String,
}

#[derive(Debug, Deserialize)]
pub struct TranscodeConfig {
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub load_timeout_secs: u64,
    pub cancel_ack_timeout_ms: u64,
    pub preset: Preset,
    pub crf: u8,
    pub preserve_audio: bool,
}

#[derive(Debug, Deserialize)]
pub struct OutputConfig {
    pub dir: String,
    pub format: OutputFormat,
    pub keep_backup: bool,
    pub file_prefix: String,
}

impl Config {
    /// Load built-in defaults, then `path` (any extension, optional), then
    /// `TYPECAST__SECTION__KEY` environment overrides.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .set_default("service.name", "typecast")?
            .set_default("service.http.bind", "127.0.0.1")?
            .set_default("service.http.port", 8787)?
            .set_default("capture.backend", "ffmpeg")?
            .set_default("capture.width", 1920)?
            .set_default("capture.height", 1080)?
            .set_default("capture.frame_rate", 30)?
            .set_default("capture.audio", false)?
            .set_default("capture.chunk_interval_ms", 1000)?
            .set_default("capture.flush_timeout_ms", 5000)?
            .set_default("capture.display", "")?
            .set_default("capture.ffmpeg_path", "ffmpeg")?
            .set_default("transcode.ffmpeg_path", "ffmpeg")?
            .set_default("transcode.ffprobe_path", "ffprobe")?
            .set_default("transcode.load_timeout_secs", 30)?
            .set_default("transcode.cancel_ack_timeout_ms", 5000)?
            .set_default("transcode.preset", "fast")?
            .set_default("transcode.crf", 23)?
            .set_default("transcode.preserve_audio", true)?
            .set_default("output.dir", "~/Videos/typecast")?
            .set_default("output.format", "mp4")?
            .set_default("output.keep_backup", true)?
            .set_default("output.file_prefix", "typecast")?
            .add_source(config::File::with_name(path).required(false))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).prefix_separator("__").separator("__"))
            .build()
            .with_context(|| format!("Failed to load config from {}", path))?;

        let config: Config = settings.try_deserialize().context("Invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        self.conversion_options()
            .validate()
            .map_err(|e| anyhow::anyhow!("transcode: {}", e))?;
        if !matches!(self.capture.backend.as_str(), "ffmpeg" | "synthetic") {
            anyhow::bail!("capture.backend must be \"ffmpeg\" or \"synthetic\", got {:?}", self.capture.backend);
        }
        if self.capture.chunk_interval_ms == 0 {
            anyhow::bail!("capture.chunk_interval_ms must be positive");
        }
        Ok(())
    }

    pub fn http_addr(&self) -> String {
        format!("{}:{}", self.service.http.bind, self.service.http.port)
    }

    /// Output directory with `~` and environment variables expanded
    pub fn output_dir(&self) -> Result<PathBuf> {
        let expanded = shellexpand::full(&self.output.dir)
            .with_context(|| format!("Failed to expand output dir {:?}", self.output.dir))?;
        Ok(PathBuf::from(expanded.as_ref()))
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            chunk_interval: Duration::from_millis(self.capture.chunk_interval_ms),
            flush_timeout: Duration::from_millis(self.capture.flush_timeout_ms),
            ..SessionConfig::default()
        }
    }

    /// Capture options used when a caller does not send any
    pub fn capture_options(&self) -> CaptureOptions {
        CaptureOptions {
            width: self.capture.width,
            height: self.capture.height,
            frame_rate: self.capture.frame_rate,
            want_audio: self.capture.audio,
        }
    }

    pub fn capture_backend(&self) -> Box<dyn CaptureBackend> {
        match self.capture.backend.as_str() {
            "synthetic" => Box::new(SyntheticBackend::new(SyntheticConfig::default())),
            _ => Box::new(FfmpegScreenBackend::new(
                &self.capture.ffmpeg_path,
                GrabInput::for_platform(&self.capture.display),
            )),
        }
    }

    pub fn codec_loader(&self) -> Arc<dyn CodecLoader> {
        Arc::new(FfmpegLoader::new(&self.transcode.ffmpeg_path, &self.transcode.ffprobe_path))
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            load_timeout: Duration::from_secs(self.transcode.load_timeout_secs),
        }
    }

    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            cancel_ack_timeout: Duration::from_millis(self.transcode.cancel_ack_timeout_ms),
        }
    }

    pub fn conversion_options(&self) -> ConversionOptions {
        ConversionOptions {
            preset: self.transcode.preset,
            quality_level: self.transcode.crf,
            target_scale: None,
            preserve_audio: self.transcode.preserve_audio,
            format: self.output.format,
        }
    }

    pub fn pipeline_defaults(&self) -> PipelineDefaults {
        PipelineDefaults {
            options: self.conversion_options(),
            keep_backup: self.output.keep_backup,
        }
    }
}

//! FFmpeg-backed codec

use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info};

use super::codec::{Codec, CodecLoader, ProgressReporter, TranscodeJob, TranscodeOutput, Workspace};
use super::options::{ConversionOptions, OutputFormat};
use super::probe::{resolve_duration, ProgressParser};
use crate::error::EngineError;

const GIF_MAX_FPS: u32 = 15;
const GIF_DEFAULT_WIDTH: i32 = 800;

/// Verifies the ffmpeg binary and enumerates its encoders
pub struct FfmpegLoader {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl FfmpegLoader {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }
}

#[async_trait]
impl CodecLoader for FfmpegLoader {
    async fn load(&self) -> Result<Arc<dyn Codec>, EngineError> {
        let output = Command::new(&self.ffmpeg)
            .args(["-hide_banner", "-encoders"])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| EngineError::LoadFailed(format!("Failed to run {:?}: {}", self.ffmpeg, e)))?;

        if !output.status.success() {
            return Err(EngineError::LoadFailed(format!(
                "{:?} -encoders exited with {}",
                self.ffmpeg, output.status
            )));
        }

        let encoders = parse_encoders(&String::from_utf8_lossy(&output.stdout));
        if encoders.is_empty() {
            return Err(EngineError::LoadFailed("ffmpeg reported no encoders".to_string()));
        }
        info!("ffmpeg loaded with {} encoders", encoders.len());

        Ok(Arc::new(FfmpegCodec {
            ffmpeg: self.ffmpeg.clone(),
            ffprobe: self.ffprobe.clone(),
            encoders,
        }))
    }

    fn probe(&self) -> bool {
        std::process::Command::new(&self.ffmpeg)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

/// Encoder names from `ffmpeg -encoders`
fn parse_encoders(listing: &str) -> HashSet<String> {
    listing
        .lines()
        .skip_while(|line| !line.trim_start().starts_with("------"))
        .skip(1)
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let flags = fields.next()?;
            let name = fields.next()?;
            (flags.len() == 6).then(|| name.to_string())
        })
        .collect()
}

pub struct FfmpegCodec {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    encoders: HashSet<String>,
}

impl FfmpegCodec {
    pub fn has_encoder(&self, name: &str) -> bool {
        self.encoders.contains(name)
    }
}

#[async_trait]
impl Codec for FfmpegCodec {
    async fn transcode(&self, job: &TranscodeJob, progress: &mut ProgressReporter) -> Result<TranscodeOutput, EngineError> {
        let options = &job.options;
        let encoder = options.format.video_codec();
        if !self.has_encoder(encoder) {
            return Err(EngineError::TranscodeFailed(format!("ffmpeg has no {} encoder", encoder)));
        }

        let workspace = Workspace::create()?;
        let source_format = OutputFormat::from_mime(&job.source.mime_type);
        let input_name = format!("input.{}", source_format.map(|f| f.extension()).unwrap_or("bin"));
        let input = workspace.write(&input_name, &job.source.data).await?;
        let output_name = format!("output.{}", options.format.extension());
        let output = workspace.path(&output_name);

        let total = resolve_duration(&self.ffmpeg, &self.ffprobe, &input, job.source.duration_ms).await;
        let parser = ProgressParser::new(total);

        let args = build_args(&input, &output, options, source_format);
        debug!("Running ffmpeg: {:?}", args);

        let mut child = Command::new(&self.ffmpeg)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::TranscodeFailed(format!("Failed to start ffmpeg: {}", e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::TranscodeFailed("Failed to capture ffmpeg stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| EngineError::TranscodeFailed("Failed to capture ffmpeg stderr".to_string()))?;

        let read_progress = async {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(percent) = parser.feed(&line) {
                    progress.report(percent);
                }
            }
        };
        let read_errors = async {
            let mut text = String::new();
            let _ = BufReader::new(stderr).read_to_string(&mut text).await;
            text
        };
        let ((), errors) = futures::future::join(read_progress, read_errors).await;

        let status = child.wait().await?;
        if !status.success() {
            return Err(EngineError::TranscodeFailed(format!(
                "ffmpeg exited with {}: {}",
                status,
                tail(&errors, 3)
            )));
        }

        let data = workspace
            .read(&output_name)
            .await
            .map_err(|e| EngineError::TranscodeFailed(format!("Failed to read ffmpeg output: {}", e)))?;
        if data.is_empty() {
            return Err(EngineError::TranscodeFailed("ffmpeg produced an empty output".to_string()));
        }

        Ok(TranscodeOutput {
            data,
            mime_type: options.format.mime_type().to_string(),
        })
    }

    fn name(&self) -> &str {
        "ffmpeg"
    }
}

/// Last `n` non-empty lines of ffmpeg's error output
fn tail(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    lines[lines.len().saturating_sub(n)..].join(" | ")
}

fn build_args(input: &Path, output: &Path, options: &ConversionOptions, source: Option<OutputFormat>) -> Vec<String> {
    let mut args = vec![
        "-hide_banner".to_string(),
        "-nostdin".to_string(),
        "-y".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-progress".to_string(),
        "pipe:1".to_string(),
        "-nostats".to_string(),
        "-i".to_string(),
        input.to_string_lossy().into_owned(),
    ];

    match options.format {
        OutputFormat::Mp4 | OutputFormat::Ts => {
            push_scale(&mut args, options.target_scale);
            args.extend([
                "-c:v".to_string(),
                "libx264".to_string(),
                "-preset".to_string(),
                options.preset.x264().to_string(),
                "-crf".to_string(),
                options.quality_level.to_string(),
                "-pix_fmt".to_string(),
                "yuv420p".to_string(),
            ]);
            if options.format == OutputFormat::Mp4 {
                args.extend(["-movflags".to_string(), "+faststart".to_string()]);
            }
        }
        OutputFormat::Webm => {
            push_scale(&mut args, options.target_scale);
            let (deadline, cpu_used) = options.preset.vp9();
            args.extend([
                "-c:v".to_string(),
                "libvpx-vp9".to_string(),
                "-deadline".to_string(),
                deadline.to_string(),
                "-cpu-used".to_string(),
                cpu_used.to_string(),
                "-crf".to_string(),
                options.quality_level.to_string(),
                "-b:v".to_string(),
                "0".to_string(),
            ]);
        }
        OutputFormat::Gif => {
            let (width, height) = options.target_scale.unwrap_or((GIF_DEFAULT_WIDTH, -1));
            args.extend([
                "-vf".to_string(),
                format!(
                    "fps={},scale={}:{}:flags=lanczos,split[s0][s1];[s0]palettegen[p];[s1][p]paletteuse",
                    GIF_MAX_FPS, width, height
                ),
            ]);
        }
    }

    args.extend(audio_args(options, source));

    let muxer = match options.format {
        OutputFormat::Mp4 => "mp4",
        OutputFormat::Webm => "webm",
        OutputFormat::Gif => "gif",
        OutputFormat::Ts => "mpegts",
    };
    args.extend(["-f".to_string(), muxer.to_string(), output.to_string_lossy().into_owned()]);
    args
}

fn push_scale(args: &mut Vec<String>, scale: Option<(i32, i32)>) {
    if let Some((width, height)) = scale {
        args.extend(["-vf".to_string(), format!("scale={}:{}", width, height)]);
    }
}

/// Audio is copied as is, except into WebM from a foreign container, which
/// only accepts Opus or Vorbis.
fn audio_args(options: &ConversionOptions, source: Option<OutputFormat>) -> Vec<String> {
    if !options.preserve_audio || !options.format.supports_audio() {
        return vec!["-an".to_string()];
    }
    if options.format == OutputFormat::Webm && source != Some(OutputFormat::Webm) {
        return vec!["-c:a".to_string(), "libopus".to_string()];
    }
    vec!["-c:a".to_string(), "copy".to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcode::options::Preset;

    fn args_for(options: ConversionOptions, source: Option<OutputFormat>) -> String {
        build_args(Path::new("/tmp/in.webm"), Path::new("/tmp/out"), &options, source).join(" ")
    }

    #[test]
    fn test_mp4_args() {
        let joined = args_for(ConversionOptions::default(), Some(OutputFormat::Webm));
        assert!(joined.contains("-progress pipe:1"));
        assert!(joined.contains("-c:v libx264 -preset veryfast -crf 23 -pix_fmt yuv420p"));
        assert!(joined.contains("-movflags +faststart"));
        assert!(joined.contains("-c:a copy"));
        assert!(!joined.contains("scale="));
        assert!(joined.ends_with("-f mp4 /tmp/out"));
    }

    #[test]
    fn test_scale_only_when_requested() {
        let options = ConversionOptions {
            target_scale: Some((1280, 720)),
            ..ConversionOptions::default()
        };
        assert!(args_for(options, None).contains("-vf scale=1280:720"));
    }

    #[test]
    fn test_webm_args() {
        let options = ConversionOptions {
            preset: Preset::Balanced,
            quality_level: 31,
            format: OutputFormat::Webm,
            ..ConversionOptions::default()
        };
        let joined = args_for(options, Some(OutputFormat::Ts));
        assert!(joined.contains("-c:v libvpx-vp9 -deadline good -cpu-used 2 -crf 31 -b:v 0"));
        assert!(joined.contains("-c:a libopus"));
        assert!(joined.ends_with("-f webm /tmp/out"));
    }

    #[test]
    fn test_audio_dropped_when_not_preserved() {
        let options = ConversionOptions {
            preserve_audio: false,
            ..ConversionOptions::default()
        };
        let joined = args_for(options, None);
        assert!(joined.contains("-an"));
        assert!(!joined.contains("-c:a"));
    }

    #[test]
    fn test_gif_uses_palette_and_no_audio() {
        let options = ConversionOptions {
            format: OutputFormat::Gif,
            ..ConversionOptions::default()
        };
        let joined = args_for(options, Some(OutputFormat::Webm));
        assert!(joined.contains("fps=15,scale=800:-1:flags=lanczos"));
        assert!(joined.contains("palettegen"));
        assert!(joined.contains("-an"));
    }

    #[test]
    fn test_parse_encoders() {
        let listing = "Encoders:\n V..... = Video\n A..... = Audio\n ------\n \
                       V....D libx264              libx264 H.264 / AVC\n \
                       V....D libvpx-vp9           libvpx VP9\n \
                       A....D aac                  AAC (Advanced Audio Coding)\n";
        let encoders = parse_encoders(listing);
        assert!(encoders.contains("libx264"));
        assert!(encoders.contains("libvpx-vp9"));
        assert!(encoders.contains("aac"));
        assert!(!encoders.contains("="));
        assert_eq!(encoders.len(), 3);
    }

    #[test]
    fn test_tail_keeps_last_lines() {
        assert_eq!(tail("a\n\nb\nc\nd\n", 2), "c | d");
        assert_eq!(tail("", 3), "");
    }
}

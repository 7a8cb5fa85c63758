// Example: Convert an ffmpeg test pattern through the transcode engine
//
// Renders a short webm clip with ffmpeg's `testsrc` source, then converts it
// with the isolated engine while printing progress.
//
// Requirements: ffmpeg and ffprobe on PATH
//
// Usage: cargo run --example test_pattern -- --seconds 5 --format gif
//
// Output lands in the system temp directory.

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::process::Command;
use tracing::{info, Level};
use typecast::{
    ConversionCoordinator, ConversionOptions, ConversionOutcome, CoordinatorConfig, EngineSettings, FfmpegLoader,
    OutputFormat, Preset, SourceMedia, TranscodeEngine,
};

#[derive(Parser)]
#[command(name = "test_pattern")]
#[command(about = "Convert a generated test clip")]
struct Args {
    /// Length of the generated clip
    #[arg(short, long, default_value = "5")]
    seconds: u32,

    /// Target format
    #[arg(short, long, default_value = "mp4")]
    format: OutputFormat,

    /// fastest | fast | balanced
    #[arg(short, long, default_value = "fast")]
    preset: Preset,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let args = Args::parse();
    let dir = std::env::temp_dir();
    let clip = dir.join("typecast-test-pattern.webm");

    info!("Rendering {}s test pattern to {}", args.seconds, clip.display());
    let status = Command::new("ffmpeg")
        .args(["-y", "-hide_banner", "-loglevel", "error", "-f", "lavfi", "-i"])
        .arg(format!("testsrc=duration={}:size=640x360:rate=30", args.seconds))
        .args(["-c:v", "libvpx-vp9", "-deadline", "realtime", "-cpu-used", "8"])
        .arg(&clip)
        .status()
        .await
        .context("Failed to run ffmpeg")?;
    if !status.success() {
        bail!("ffmpeg could not render the test pattern");
    }

    let engine = TranscodeEngine::spawn(Arc::new(FfmpegLoader::new("ffmpeg", "ffprobe")), EngineSettings::default())?;
    let coordinator = ConversionCoordinator::new(engine, CoordinatorConfig::default());

    let source = SourceMedia {
        data: tokio::fs::read(&clip).await?,
        mime_type: "video/webm".to_string(),
        duration_ms: Some(u64::from(args.seconds) * 1000),
    };
    let options = ConversionOptions {
        preset: args.preset,
        format: args.format,
        ..ConversionOptions::default()
    };

    let outcome = coordinator
        .convert(source, options, |p| info!("{:?} {:>3}% {}", p.stage, p.percent, p.message))
        .await?;

    match outcome {
        ConversionOutcome::Completed(result) => {
            let output = dir.join(format!("typecast-test-pattern.{}", args.format.extension()));
            tokio::fs::write(&output, &result.buffer).await?;
            info!(
                "Wrote {} ({} bytes, {} in {}ms)",
                output.display(),
                result.size_bytes,
                result.mime_type,
                result.elapsed_ms
            );
        }
        ConversionOutcome::Cancelled => info!("Cancelled"),
    }

    Ok(())
}

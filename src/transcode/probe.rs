//! Source duration lookup and ffmpeg progress parsing

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Resolve the source duration used for progress math.
///
/// Recorded streams often have no duration in their container header. When
/// ffprobe reports none (or `N/A`), decode to the null muxer and take the
/// last timestamp. Fall back to the capturer's hint if that fails too.
pub async fn resolve_duration(ffmpeg: &Path, ffprobe: &Path, input: &Path, hint_ms: Option<u64>) -> Option<Duration> {
    if let Some(seconds) = probe_duration(ffprobe, input).await {
        return Some(Duration::from_secs_f64(seconds));
    }
    debug!("Container reports no duration for {:?}, recalculating", input);
    if let Some(seconds) = recalculate_duration(ffmpeg, input).await {
        return Some(Duration::from_secs_f64(seconds));
    }
    if hint_ms.is_none() {
        warn!("Could not determine duration of {:?}, progress will be coarse", input);
    }
    hint_ms.map(Duration::from_millis)
}

async fn probe_duration(ffprobe: &Path, input: &Path) -> Option<f64> {
    let output = Command::new(ffprobe)
        .args(["-v", "error", "-show_entries", "format=duration", "-of", "default=noprint_wrappers=1:nokey=1"])
        .arg(input)
        .stdin(Stdio::null())
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    parse_seconds(String::from_utf8_lossy(&output.stdout).trim())
}

async fn recalculate_duration(ffmpeg: &Path, input: &Path) -> Option<f64> {
    let output = Command::new(ffmpeg)
        .args(["-hide_banner", "-nostdin", "-i"])
        .arg(input)
        .args(["-f", "null", "-"])
        .stdin(Stdio::null())
        .output()
        .await
        .ok()?;
    let stderr = String::from_utf8_lossy(&output.stderr);
    last_stats_time(&stderr)
}

/// Positive, finite seconds
fn parse_seconds(s: &str) -> Option<f64> {
    s.parse::<f64>().ok().filter(|v| v.is_finite() && *v > 0.0)
}

/// Last `time=` value in ffmpeg's stats output, in seconds
fn last_stats_time(stderr: &str) -> Option<f64> {
    stderr
        .split(['\r', '\n'])
        .filter_map(|line| extract_value(line, "time="))
        .filter_map(|t| parse_timestamp(&t))
        .last()
        .filter(|v| *v > 0.0)
}

/// Value following `key` in an ffmpeg stats line, up to the next whitespace
pub fn extract_value(line: &str, key: &str) -> Option<String> {
    let start = line.find(key)?;
    let after_key = &line[start + key.len()..];
    let value_part = after_key.trim_start();
    let end = value_part.find(char::is_whitespace).unwrap_or(value_part.len());
    let value = &value_part[..end];
    (!value.is_empty()).then(|| value.to_string())
}

/// `HH:MM:SS.frac` to seconds
pub fn parse_timestamp(s: &str) -> Option<f64> {
    let mut parts = s.trim().trim_start_matches('-').splitn(3, ':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    let total = hours * 3600.0 + minutes * 60.0 + seconds;
    total.is_finite().then_some(total)
}

/// Turns `-progress pipe:1` key=value output into percentages
#[derive(Debug)]
pub struct ProgressParser {
    total: Option<Duration>,
}

impl ProgressParser {
    pub fn new(total: Option<Duration>) -> Self {
        Self {
            total: total.filter(|d| !d.is_zero()),
        }
    }

    /// Percentage for one line, if it carries progress.
    ///
    /// Stays below 100 until ffmpeg reports `progress=end`.
    pub fn feed(&self, line: &str) -> Option<u8> {
        let (key, value) = line.trim().split_once('=')?;
        match key {
            "progress" if value == "end" => Some(100),
            // out_time_ms is microseconds as well
            "out_time_us" | "out_time_ms" => {
                let micros: i64 = value.parse().ok()?;
                self.percent_of(Duration::from_micros(micros.max(0) as u64))
            }
            _ => None,
        }
    }

    fn percent_of(&self, position: Duration) -> Option<u8> {
        let total = self.total?;
        let ratio = position.as_secs_f64() / total.as_secs_f64();
        Some((ratio * 100.0).clamp(0.0, 99.0) as u8)
    }
}

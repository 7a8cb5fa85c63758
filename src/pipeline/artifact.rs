use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::session::CapturedMedia;
use crate::transcode::{ConversionResult, OutputFormat};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactRole {
    /// What the caller asked for, or the original when conversion failed
    Final,
    /// Original capture kept alongside a conversion
    Backup,
}

/// A finished media buffer with its metadata
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    #[serde(skip)]
    pub buffer: Arc<[u8]>,
    pub mime_type: String,
    pub size_bytes: u64,
    pub duration_ms: u64,
    /// `None` when the mime type is not one we know
    pub format: Option<OutputFormat>,
    pub role: ArtifactRole,
}

impl Artifact {
    pub fn from_media(media: &CapturedMedia, role: ArtifactRole) -> Self {
        Self {
            buffer: media.shared_buffer(),
            mime_type: media.mime_type().to_string(),
            size_bytes: media.size_bytes(),
            duration_ms: media.duration_ms(),
            format: OutputFormat::from_mime(media.mime_type()),
            role,
        }
    }

    pub fn from_conversion(result: ConversionResult, format: OutputFormat, duration_ms: u64) -> Self {
        Self {
            size_bytes: result.size_bytes,
            mime_type: result.mime_type,
            buffer: result.buffer.into(),
            duration_ms,
            format: Some(format),
            role: ArtifactRole::Final,
        }
    }

    pub fn extension(&self) -> &'static str {
        self.format.map(|f| f.extension()).unwrap_or("bin")
    }
}

/// Where a sink put an artifact
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredArtifact {
    pub name: String,
    pub location: String,
    pub role: ArtifactRole,
    pub size_bytes: u64,
}

/// Receives finished artifacts
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    async fn store(&self, artifact: &Artifact) -> Result<StoredArtifact>;
}

/// Writes artifacts as timestamped files in one directory
pub struct DirectorySink {
    dir: PathBuf,
    prefix: String,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    pub fn dir(&self) -> &PathBuf {
        &self.dir
    }

    fn file_name(&self, artifact: &Artifact) -> String {
        let stamp = Utc::now().format("%Y%m%d-%H%M%S");
        let unique = Uuid::new_v4().simple().to_string();
        let suffix = match artifact.role {
            ArtifactRole::Final => "",
            ArtifactRole::Backup => "-original",
        };
        format!(
            "{}-{}-{}{}.{}",
            self.prefix,
            stamp,
            &unique[..8],
            suffix,
            artifact.extension()
        )
    }
}

#[async_trait]
impl ArtifactSink for DirectorySink {
    async fn store(&self, artifact: &Artifact) -> Result<StoredArtifact> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create output directory {:?}", self.dir))?;

        let name = self.file_name(artifact);
        let path = self.dir.join(&name);
        tokio::fs::write(&path, &artifact.buffer[..])
            .await
            .with_context(|| format!("Failed to write artifact {:?}", path))?;

        info!("Saved {:?} artifact: {:?} ({} bytes)", artifact.role, path, artifact.size_bytes);

        Ok(StoredArtifact {
            name,
            location: path.to_string_lossy().into_owned(),
            role: artifact.role,
            size_bytes: artifact.size_bytes,
        })
    }
}

//! Codec seam of the transcode engine.
//!
//! The engine owns exactly one codec instance, obtained from a
//! [`CodecLoader`] on first use and reused until it is torn down.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

use super::messages::SourceMedia;
use super::options::ConversionOptions;
use crate::error::EngineError;

/// One conversion handed to a codec
#[derive(Debug, Clone)]
pub struct TranscodeJob {
    pub source: SourceMedia,
    pub options: ConversionOptions,
}

/// Bytes produced by a codec
#[derive(Debug, Clone)]
pub struct TranscodeOutput {
    pub data: Vec<u8>,
    pub mime_type: String,
}

/// Forwards codec progress, keeping it within 0..=100 and non-decreasing
pub struct ProgressReporter {
    last: u8,
    emit: Box<dyn FnMut(u8) + Send>,
}

impl ProgressReporter {
    pub fn new(emit: impl FnMut(u8) + Send + 'static) -> Self {
        Self {
            last: 0,
            emit: Box::new(emit),
        }
    }

    /// Report a percentage; values at or below the last one are dropped
    pub fn report(&mut self, percent: u8) {
        let percent = percent.min(100);
        if percent > self.last {
            self.last = percent;
            (self.emit)(percent);
        }
    }

    pub fn last(&self) -> u8 {
        self.last
    }
}

#[async_trait]
pub trait Codec: Send + Sync {
    /// Run one conversion. Never called concurrently.
    async fn transcode(&self, job: &TranscodeJob, progress: &mut ProgressReporter) -> Result<TranscodeOutput, EngineError>;

    fn name(&self) -> &str;
}

#[async_trait]
pub trait CodecLoader: Send + Sync {
    /// Produce a ready codec instance. May be slow.
    async fn load(&self) -> Result<Arc<dyn Codec>, EngineError>;

    /// Quick check that the codec runtime exists on this host
    fn probe(&self) -> bool;
}

/// Scoped working storage for one conversion, removed when dropped
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn create() -> Result<Self, EngineError> {
        let dir = tempfile::Builder::new().prefix("typecast-").tempdir()?;
        Ok(Self { dir })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub async fn write(&self, name: &str, data: &[u8]) -> Result<PathBuf, EngineError> {
        let path = self.path(name);
        tokio::fs::write(&path, data).await?;
        Ok(path)
    }

    pub async fn read(&self, name: &str) -> Result<Vec<u8>, EngineError> {
        Ok(tokio::fs::read(self.path(name)).await?)
    }
}

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use super::artifact::{Artifact, ArtifactRole, ArtifactSink, StoredArtifact};
use crate::conversion::{ConversionCoordinator, CoordinatorState};
use crate::error::{CaptureError, ConversionError, PipelineError};
use crate::session::{CaptureSession, CapturedMedia};
use crate::transcode::{ConversionOptions, ConversionOutcome, ConversionProgress, OutputFormat, Preset, SourceMedia};

/// Format and backup policy applied when nothing else is requested
#[derive(Debug, Clone)]
pub struct PipelineDefaults {
    pub options: ConversionOptions,
    /// Emit the original capture before converting it
    pub keep_backup: bool,
}

impl Default for PipelineDefaults {
    fn default() -> Self {
        Self {
            options: ConversionOptions::default(),
            keep_backup: true,
        }
    }
}

/// Per-delivery overrides of [`PipelineDefaults`]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeliveryRequest {
    pub format: Option<OutputFormat>,
    pub preset: Option<Preset>,
    pub quality_level: Option<u8>,
    pub target_scale: Option<(i32, i32)>,
    pub preserve_audio: Option<bool>,
    pub keep_backup: Option<bool>,
}

impl DeliveryRequest {
    pub fn format(format: OutputFormat) -> Self {
        Self {
            format: Some(format),
            ..Self::default()
        }
    }

    fn resolve(&self, defaults: &PipelineDefaults) -> (ConversionOptions, bool) {
        let base = defaults.options;
        let options = ConversionOptions {
            preset: self.preset.unwrap_or(base.preset),
            quality_level: self.quality_level.unwrap_or(base.quality_level),
            target_scale: self.target_scale.or(base.target_scale),
            preserve_audio: self.preserve_audio.unwrap_or(base.preserve_audio),
            format: self.format.unwrap_or(base.format),
        };
        (options, self.keep_backup.unwrap_or(defaults.keep_backup))
    }
}

/// What happened to one captured recording
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReport {
    /// `None` only when the conversion was cancelled
    pub artifact: Option<Artifact>,
    pub backup: Option<Artifact>,
    pub stored: Vec<StoredArtifact>,
    /// The engine produced the final artifact
    pub converted: bool,
    pub cancelled: bool,
    /// Set when conversion failed and the original was delivered instead
    pub warning: Option<String>,
}

/// Glues capture output to the conversion coordinator and the sinks
pub struct PipelineOrchestrator {
    coordinator: Arc<ConversionCoordinator>,
    sinks: Vec<Arc<dyn ArtifactSink>>,
    defaults: PipelineDefaults,
}

impl PipelineOrchestrator {
    pub fn new(coordinator: Arc<ConversionCoordinator>, defaults: PipelineDefaults) -> Self {
        Self {
            coordinator,
            sinks: Vec::new(),
            defaults,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ArtifactSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn coordinator(&self) -> &Arc<ConversionCoordinator> {
        &self.coordinator
    }

    pub fn defaults(&self) -> &PipelineDefaults {
        &self.defaults
    }

    /// Stop `session` and deliver what it recorded.
    ///
    /// Invalid options or a conversion already in flight are rejected before
    /// the session is touched. When the host already ended the capture, the
    /// media the session sealed at that point is delivered instead.
    pub async fn finish(
        &self,
        session: &CaptureSession,
        request: DeliveryRequest,
        on_progress: impl Fn(ConversionProgress) + Send + Sync + 'static,
    ) -> Result<DeliveryReport, PipelineError> {
        let (options, _) = request.resolve(&self.defaults);
        options.validate().map_err(ConversionError::InvalidOptions)?;
        if self.coordinator.state() == CoordinatorState::Converting {
            return Err(ConversionError::ConversionInProgress.into());
        }

        let media = match session.stop().await {
            Ok(media) => media,
            Err(CaptureError::NotRecording) => match session.take_terminated().await {
                Some(media) => {
                    info!("Delivering capture that the host ended early");
                    media
                }
                None => return Err(CaptureError::NotRecording.into()),
            },
            Err(e) => return Err(e.into()),
        };
        self.deliver(media, request, on_progress).await
    }

    /// Pass through, or back up and convert, then hand the result to every sink.
    ///
    /// Passthrough happens when the capture is already in the requested
    /// format and no rescale is asked for; preset and quality only apply
    /// when re-encoding.
    pub async fn deliver(
        &self,
        media: CapturedMedia,
        request: DeliveryRequest,
        on_progress: impl Fn(ConversionProgress) + Send + Sync + 'static,
    ) -> Result<DeliveryReport, PipelineError> {
        let (options, keep_backup) = request.resolve(&self.defaults);
        let native = OutputFormat::from_mime(media.mime_type());
        let mut stored = Vec::new();

        if native == Some(options.format) && options.target_scale.is_none() {
            info!("Captured media is already {:?}, passing through", options.format);
            let artifact = Artifact::from_media(&media, ArtifactRole::Final);
            stored.extend(self.store(&artifact).await?);
            return Ok(DeliveryReport {
                artifact: Some(artifact),
                backup: None,
                stored,
                converted: false,
                cancelled: false,
                warning: None,
            });
        }

        let backup = if keep_backup {
            let backup = Artifact::from_media(&media, ArtifactRole::Backup);
            stored.extend(self.store(&backup).await?);
            Some(backup)
        } else {
            None
        };

        let source = SourceMedia {
            data: media.buffer().to_vec(),
            mime_type: media.mime_type().to_string(),
            duration_ms: Some(media.duration_ms()),
        };

        let (artifact, converted, warning) = match self.coordinator.convert(source, options, on_progress).await {
            Ok(ConversionOutcome::Completed(result)) => {
                info!(
                    "Converted {} bytes of {} into {} bytes of {} in {}ms",
                    media.size_bytes(),
                    media.mime_type(),
                    result.size_bytes,
                    result.mime_type,
                    result.elapsed_ms
                );
                (Artifact::from_conversion(result, options.format, media.duration_ms()), true, None)
            }
            Ok(ConversionOutcome::Cancelled) => {
                info!("Conversion cancelled, nothing delivered");
                return Ok(DeliveryReport {
                    artifact: None,
                    backup,
                    stored,
                    converted: false,
                    cancelled: true,
                    warning: None,
                });
            }
            Err(e @ (ConversionError::TranscodeFailed(_) | ConversionError::ConversionInProgress)) => {
                let reason = match e {
                    ConversionError::TranscodeFailed(reason) => reason,
                    other => other.to_string(),
                };
                let warning = format!(
                    "Conversion to {} failed ({}); delivered the original {} instead",
                    options.format.extension(),
                    reason,
                    media.mime_type()
                );
                warn!("{}", warning);
                (Artifact::from_media(&media, ArtifactRole::Final), false, Some(warning))
            }
            Err(e) => return Err(e.into()),
        };

        stored.extend(self.store(&artifact).await?);
        Ok(DeliveryReport {
            artifact: Some(artifact),
            backup,
            stored,
            converted,
            cancelled: false,
            warning,
        })
    }

    async fn store(&self, artifact: &Artifact) -> Result<Vec<StoredArtifact>, PipelineError> {
        let mut stored = Vec::with_capacity(self.sinks.len());
        for sink in &self.sinks {
            let receipt = sink
                .store(artifact)
                .await
                .map_err(|e| PipelineError::Sink(format!("{:#}", e)))?;
            stored.push(receipt);
        }
        Ok(stored)
    }
}

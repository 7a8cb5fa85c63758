use crate::pipeline::{DeliveryReport, PipelineOrchestrator};
use crate::session::{CaptureOptions, CaptureSession};
use crate::transcode::ConversionProgress;
use std::path::PathBuf;
use std::sync::Arc;
use parking_lot::Mutex;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// The one capture session this service drives
    pub session: CaptureSession,

    pub orchestrator: Arc<PipelineOrchestrator>,

    /// Used when `/capture/start` is called without a body
    pub capture_defaults: CaptureOptions,

    /// Served under `/artifacts`
    pub artifacts_dir: PathBuf,

    /// Latest progress of the running conversion
    pub progress: Arc<Mutex<Option<ConversionProgress>>>,

    /// Report of the last finished delivery
    pub last_report: Arc<Mutex<Option<DeliveryReport>>>,
}

impl AppState {
    pub fn new(
        session: CaptureSession,
        orchestrator: Arc<PipelineOrchestrator>,
        capture_defaults: CaptureOptions,
        artifacts_dir: PathBuf,
    ) -> Self {
        Self {
            session,
            orchestrator,
            capture_defaults,
            artifacts_dir,
            progress: Arc::new(Mutex::new(None)),
            last_report: Arc::new(Mutex::new(None)),
        }
    }
}

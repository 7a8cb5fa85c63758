//! Isolated transcode engine.
//!
//! The engine runs on its own OS thread with a current-thread runtime and is
//! reachable only through request and response channels. It owns the codec
//! slot and runs at most one conversion at a time.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::codec::{CodecLoader, ProgressReporter, TranscodeJob};
use super::loader::CodecSlot;
use super::messages::{EngineRequest, EngineResponse, SourceMedia, WireOptions, WireResult};
use super::options::{ConversionOptions, ConversionProgress};
use crate::error::ErrorCode;

pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Upper bound on waiting for the codec to load
    pub load_timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            load_timeout: DEFAULT_LOAD_TIMEOUT,
        }
    }
}

/// Caller side of an engine: the request sender, the response receiver and
/// the loader used for capability probes.
pub struct EngineHandle {
    requests: mpsc::UnboundedSender<EngineRequest>,
    responses: mpsc::UnboundedReceiver<EngineResponse>,
    loader: Arc<dyn CodecLoader>,
}

impl EngineHandle {
    /// Wrap channels whose other ends are served by something else than
    /// [`TranscodeEngine`], such as a scripted engine in tests.
    pub fn from_channels(
        requests: mpsc::UnboundedSender<EngineRequest>,
        responses: mpsc::UnboundedReceiver<EngineResponse>,
        loader: Arc<dyn CodecLoader>,
    ) -> Self {
        Self {
            requests,
            responses,
            loader,
        }
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        mpsc::UnboundedSender<EngineRequest>,
        mpsc::UnboundedReceiver<EngineResponse>,
        Arc<dyn CodecLoader>,
    ) {
        (self.requests, self.responses, self.loader)
    }
}

struct RunningJob {
    id: String,
    task: JoinHandle<()>,
}

pub struct TranscodeEngine {
    slot: Arc<CodecSlot>,
    responses: mpsc::UnboundedSender<EngineResponse>,
    current: Option<RunningJob>,
}

impl TranscodeEngine {
    /// Start the engine on a dedicated thread.
    ///
    /// The engine stops when every request sender is dropped.
    pub fn spawn(loader: Arc<dyn CodecLoader>, settings: EngineSettings) -> std::io::Result<EngineHandle> {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (response_tx, response_rx) = mpsc::unbounded_channel();
        let engine_loader = Arc::clone(&loader);

        std::thread::Builder::new()
            .name("transcode-engine".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        error!("Failed to build transcode engine runtime: {}", e);
                        return;
                    }
                };
                let engine = TranscodeEngine {
                    slot: Arc::new(CodecSlot::new(engine_loader, settings.load_timeout)),
                    responses: response_tx,
                    current: None,
                };
                runtime.block_on(engine.run(request_rx));
            })?;

        Ok(EngineHandle::from_channels(request_tx, response_rx, loader))
    }

    async fn run(mut self, mut requests: mpsc::UnboundedReceiver<EngineRequest>) {
        info!("Transcode engine started");
        while let Some(request) = requests.recv().await {
            match request {
                EngineRequest::Convert { id, source, options } => self.convert(id, source, options),
                EngineRequest::Cancel { id } => self.cancel(id).await,
                EngineRequest::Load { id } => self.load(id),
            }
        }
        if let Some(job) = self.current.take() {
            job.task.abort();
        }
        self.slot.teardown();
        info!("Transcode engine stopped");
    }

    fn convert(&mut self, id: String, source: SourceMedia, options: WireOptions) {
        if let Some(job) = &self.current {
            if !job.task.is_finished() {
                warn!("Rejecting conversion {}: {} is still running", id, job.id);
                self.send(EngineResponse::error(id, "a conversion is already running", ErrorCode::Busy));
                return;
            }
        }

        let options = match ConversionOptions::try_from(options) {
            Ok(options) => options,
            Err(reason) => {
                self.send(EngineResponse::error(id, reason, ErrorCode::TranscodeFailed));
                return;
            }
        };

        debug!(
            "Accepted conversion {}: {} bytes of {} to {:?}",
            id,
            source.data.len(),
            source.mime_type,
            options.format
        );
        let job = TranscodeJob { source, options };
        let task = tokio::spawn(run_job(Arc::clone(&self.slot), self.responses.clone(), id.clone(), job));
        self.current = Some(RunningJob { id, task });
    }

    /// Destructive cancel: abort the job, wait for it to unwind, drop the codec
    async fn cancel(&mut self, id: String) {
        match self.current.take() {
            Some(job) => {
                job.task.abort();
                // Dropping the job kills ffmpeg and removes its workspace
                let _ = job.task.await;
                info!("Conversion {} cancelled", job.id);
            }
            None => debug!("Cancel {} with no running conversion", id),
        }
        self.slot.teardown();
        self.send(EngineResponse::Cancelled { id });
    }

    fn load(&self, id: String) {
        let slot = Arc::clone(&self.slot);
        let responses = self.responses.clone();
        tokio::spawn(async move {
            let response = match slot.get().await {
                Ok(_) => EngineResponse::Loaded { id },
                Err(e) => EngineResponse::error(id, e.to_string(), e.code()),
            };
            let _ = responses.send(response);
        });
    }

    fn send(&self, response: EngineResponse) {
        if self.responses.send(response).is_err() {
            debug!("Engine response dropped: caller is gone");
        }
    }
}

async fn run_job(
    slot: Arc<CodecSlot>,
    responses: mpsc::UnboundedSender<EngineResponse>,
    id: String,
    job: TranscodeJob,
) {
    let started = Instant::now();

    if !slot.is_loaded() {
        let _ = responses.send(EngineResponse::progress(id.clone(), ConversionProgress::loading()));
    }

    let codec = match slot.get().await {
        Ok(codec) => codec,
        Err(e) => {
            warn!("Conversion {} could not load the transcoder: {}", id, e);
            let _ = responses.send(EngineResponse::error(id, e.to_string(), e.code()));
            return;
        }
    };

    let progress_tx = responses.clone();
    let progress_id = id.clone();
    let mut reporter = ProgressReporter::new(move |percent| {
        let progress = ConversionProgress::converting(percent);
        let _ = progress_tx.send(EngineResponse::progress(progress_id.clone(), progress));
    });

    let response = match codec.transcode(&job, &mut reporter).await {
        Ok(output) => {
            let _ = responses.send(EngineResponse::progress(id.clone(), ConversionProgress::finalizing()));
            let elapsed_ms = started.elapsed().as_millis() as u64;
            let size_bytes = output.data.len() as u64;
            info!(
                "Conversion {} finished in {}ms: {} -> {} bytes",
                id,
                elapsed_ms,
                job.source.data.len(),
                size_bytes
            );
            EngineResponse::Success {
                id,
                result: WireResult {
                    data: output.data,
                    mime_type: output.mime_type,
                    size_bytes,
                    elapsed_ms,
                },
            }
        }
        Err(e) => {
            warn!("Conversion {} failed: {}", id, e);
            EngineResponse::error(id, e.to_string(), e.code())
        }
    };
    let _ = responses.send(response);
}

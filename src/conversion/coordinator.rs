use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ConversionError;
use crate::transcode::{
    CodecLoader, ConversionOptions, ConversionOutcome, ConversionProgress, ConversionResult, EngineHandle,
    EngineRequest, EngineResponse, SourceMedia,
};

pub const DEFAULT_CANCEL_ACK_TIMEOUT: Duration = Duration::from_secs(5);

pub type ProgressCallback = Arc<dyn Fn(ConversionProgress) + Send + Sync>;

type Resolution = Result<ConversionOutcome, ConversionError>;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// How long a cancelled conversion waits for the engine's teardown ack
    pub cancel_ack_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            cancel_ack_timeout: DEFAULT_CANCEL_ACK_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CoordinatorState {
    Idle,
    Converting,
}

struct Pending {
    id: String,
    on_progress: ProgressCallback,
    resolver: oneshot::Sender<Resolution>,
    last_percent: u8,
}

#[derive(Default)]
struct Shared {
    /// The single in-flight conversion
    pending: Mutex<Option<Pending>>,
    /// Waiters for terminal replies to cancel and load requests
    acks: Mutex<HashMap<String, oneshot::Sender<EngineResponse>>>,
}

impl Shared {
    fn route(&self, response: EngineResponse) {
        if response.is_terminal() {
            if let Some(ack) = self.acks.lock().remove(response.id()) {
                let _ = ack.send(response);
                return;
            }
        }

        let mut guard = self.pending.lock();
        if !guard.as_ref().is_some_and(|p| p.id == response.id()) {
            debug!("Dropping engine message for stale id {}", response.id());
            return;
        }

        match response {
            EngineResponse::Progress {
                progress: percent,
                stage,
                message,
                ..
            } => {
                let Some(pending) = guard.as_mut() else { return };
                if percent < pending.last_percent {
                    return;
                }
                pending.last_percent = percent;
                let on_progress = Arc::clone(&pending.on_progress);
                drop(guard);
                on_progress(ConversionProgress {
                    stage,
                    percent,
                    message,
                });
            }
            EngineResponse::Success { result, .. } => {
                if let Some(pending) = guard.take() {
                    info!("Conversion {} completed: {} bytes", pending.id, result.size_bytes);
                    let _ = pending.resolver.send(Ok(ConversionOutcome::Completed(ConversionResult {
                        buffer: result.data,
                        elapsed_ms: result.elapsed_ms,
                        size_bytes: result.size_bytes,
                        mime_type: result.mime_type,
                    })));
                }
            }
            EngineResponse::Error { message, code, .. } => {
                if let Some(pending) = guard.take() {
                    warn!("Conversion {} failed: {}", pending.id, message);
                    let _ = pending.resolver.send(Err(ConversionError::from_wire(code, message)));
                }
            }
            EngineResponse::Cancelled { .. } => {
                if let Some(pending) = guard.take() {
                    let _ = pending.resolver.send(Ok(ConversionOutcome::Cancelled));
                }
            }
            EngineResponse::Loaded { .. } => {}
        }
    }

    fn engine_gone(&self) {
        if let Some(pending) = self.pending.lock().take() {
            let _ = pending.resolver.send(Err(ConversionError::EngineUnavailable));
        }
        self.acks.lock().clear();
    }
}

/// Caller-facing facade over a transcode engine.
///
/// Allows one conversion at a time, correlates engine messages by id and
/// drops anything addressed to a superseded conversion.
pub struct ConversionCoordinator {
    requests: mpsc::UnboundedSender<EngineRequest>,
    loader: Arc<dyn CodecLoader>,
    shared: Arc<Shared>,
    router: JoinHandle<()>,
    config: CoordinatorConfig,
}

impl ConversionCoordinator {
    /// Must be called from within a tokio runtime
    pub fn new(engine: EngineHandle, config: CoordinatorConfig) -> Self {
        let (requests, mut responses, loader) = engine.into_parts();
        let shared = Arc::new(Shared::default());

        let router_shared = Arc::clone(&shared);
        let router = tokio::spawn(async move {
            while let Some(response) = responses.recv().await {
                router_shared.route(response);
            }
            warn!("Transcode engine closed its response channel");
            router_shared.engine_gone();
        });

        Self {
            requests,
            loader,
            shared,
            router,
            config,
        }
    }

    pub fn state(&self) -> CoordinatorState {
        if self.shared.pending.lock().is_some() {
            CoordinatorState::Converting
        } else {
            CoordinatorState::Idle
        }
    }

    /// Convert `source`, reporting progress through `on_progress`.
    ///
    /// Cancellation resolves as [`ConversionOutcome::Cancelled`], not an error.
    pub async fn convert(
        &self,
        source: SourceMedia,
        options: ConversionOptions,
        on_progress: impl Fn(ConversionProgress) + Send + Sync + 'static,
    ) -> Result<ConversionOutcome, ConversionError> {
        let id = Uuid::new_v4().to_string();
        let (resolver, resolution) = oneshot::channel();

        {
            let mut pending = self.shared.pending.lock();
            if pending.is_some() {
                return Err(ConversionError::ConversionInProgress);
            }
            options.validate().map_err(ConversionError::InvalidOptions)?;
            *pending = Some(Pending {
                id: id.clone(),
                on_progress: Arc::new(on_progress),
                resolver,
                last_percent: 0,
            });
        }

        info!(
            "Starting conversion {}: {} bytes of {} to {:?}",
            id,
            source.data.len(),
            source.mime_type,
            options.format
        );

        let request = EngineRequest::Convert {
            id: id.clone(),
            source,
            options: options.into(),
        };
        if self.requests.send(request).is_err() {
            let mut pending = self.shared.pending.lock();
            if pending.as_ref().is_some_and(|p| p.id == id) {
                *pending = None;
            }
            return Err(ConversionError::EngineUnavailable);
        }

        resolution.await.unwrap_or(Err(ConversionError::EngineUnavailable))
    }

    /// Cancel the in-flight conversion. Returns false when idle.
    ///
    /// The coordinator is idle again as soon as this returns; the pending
    /// `convert()` resolves once the engine confirms teardown or the ack
    /// timeout passes. Must be called from within a tokio runtime.
    pub fn cancel(&self) -> bool {
        let Some(pending) = self.shared.pending.lock().take() else {
            debug!("Cancel ignored: no conversion in progress");
            return false;
        };

        let cancel_id = Uuid::new_v4().to_string();
        info!("Cancelling conversion {} (cancel id {})", pending.id, cancel_id);

        let (ack_tx, ack_rx) = oneshot::channel();
        self.shared.acks.lock().insert(cancel_id.clone(), ack_tx);

        if self.requests.send(EngineRequest::Cancel { id: cancel_id.clone() }).is_err() {
            self.shared.acks.lock().remove(&cancel_id);
            let _ = pending.resolver.send(Ok(ConversionOutcome::Cancelled));
            return true;
        }

        let shared = Arc::clone(&self.shared);
        let timeout = self.config.cancel_ack_timeout;
        tokio::spawn(async move {
            match tokio::time::timeout(timeout, ack_rx).await {
                Ok(Ok(_)) => debug!("Engine confirmed teardown for {}", pending.id),
                Ok(Err(_)) => debug!("Engine went away before confirming teardown"),
                Err(_) => {
                    warn!("Engine did not confirm teardown within {:?}", timeout);
                    shared.acks.lock().remove(&cancel_id);
                }
            }
            let _ = pending.resolver.send(Ok(ConversionOutcome::Cancelled));
        });
        true
    }

    /// Whether the engine context is alive and the codec runtime exists
    pub async fn is_available(&self) -> bool {
        if self.requests.is_closed() {
            return false;
        }
        let loader = Arc::clone(&self.loader);
        tokio::task::spawn_blocking(move || loader.probe())
            .await
            .unwrap_or(false)
    }

    /// Load the codec ahead of the first conversion
    pub async fn preload(&self) -> Result<(), ConversionError> {
        let id = Uuid::new_v4().to_string();
        let (ack_tx, ack_rx) = oneshot::channel();
        self.shared.acks.lock().insert(id.clone(), ack_tx);

        if self.requests.send(EngineRequest::Load { id: id.clone() }).is_err() {
            self.shared.acks.lock().remove(&id);
            return Err(ConversionError::EngineUnavailable);
        }

        match ack_rx.await {
            Ok(EngineResponse::Loaded { .. }) => {
                info!("Transcoder preloaded");
                Ok(())
            }
            Ok(EngineResponse::Error { message, code, .. }) => Err(ConversionError::from_wire(code, message)),
            Ok(other) => Err(ConversionError::EngineLoadFailed(format!(
                "unexpected reply to load: {:?}",
                other
            ))),
            Err(_) => Err(ConversionError::EngineUnavailable),
        }
    }
}

impl Drop for ConversionCoordinator {
    fn drop(&mut self) {
        self.router.abort();
    }
}

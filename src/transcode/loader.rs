//! Lazy, shared codec initialization.
//!
//! The first caller starts the load; everyone else subscribes to the same
//! in-flight load through a watch channel. Waits are bounded, and a timed
//! out or torn down slot goes back to `NotLoaded`.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::codec::{Codec, CodecLoader};
use crate::error::EngineError;

#[derive(Clone)]
pub enum LoadState {
    NotLoaded,
    Loading,
    Loaded(Arc<dyn Codec>),
    /// Last load failed; the next caller starts a fresh load
    Failed(String),
}

impl std::fmt::Debug for LoadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoadState::NotLoaded => write!(f, "NotLoaded"),
            LoadState::Loading => write!(f, "Loading"),
            LoadState::Loaded(codec) => write!(f, "Loaded({})", codec.name()),
            LoadState::Failed(reason) => write!(f, "Failed({})", reason),
        }
    }
}

pub struct CodecSlot {
    loader: Arc<dyn CodecLoader>,
    state: Arc<watch::Sender<LoadState>>,
    load_task: Mutex<Option<JoinHandle<()>>>,
    timeout: Duration,
}

impl CodecSlot {
    pub fn new(loader: Arc<dyn CodecLoader>, timeout: Duration) -> Self {
        let (state, _) = watch::channel(LoadState::NotLoaded);
        Self {
            loader,
            state: Arc::new(state),
            load_task: Mutex::new(None),
            timeout,
        }
    }

    pub fn state(&self) -> LoadState {
        self.state.borrow().clone()
    }

    pub fn is_loaded(&self) -> bool {
        matches!(*self.state.borrow(), LoadState::Loaded(_))
    }

    /// Get the codec, loading it if nobody has yet
    pub async fn get(&self) -> Result<Arc<dyn Codec>, EngineError> {
        let mut rx = self.state.subscribe();
        self.start_load_if_idle();

        let wait = async {
            loop {
                let current = rx.borrow_and_update().clone();
                match current {
                    LoadState::Loaded(codec) => return Ok(codec),
                    LoadState::Failed(reason) => return Err(EngineError::LoadFailed(reason)),
                    LoadState::NotLoaded => {
                        return Err(EngineError::LoadFailed("transcoder was torn down while loading".to_string()))
                    }
                    LoadState::Loading => {}
                }
                if rx.changed().await.is_err() {
                    return Err(EngineError::LoadFailed("transcoder slot closed".to_string()));
                }
            }
        };

        match tokio::time::timeout(self.timeout, wait).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Transcoder load exceeded {:?}, resetting", self.timeout);
                self.teardown();
                Err(EngineError::LoadTimeout(self.timeout))
            }
        }
    }

    /// Drop the codec instance and abort any in-flight load
    pub fn teardown(&self) {
        if let Some(task) = self.load_task.lock().take() {
            task.abort();
        }
        let previous = self.state.send_replace(LoadState::NotLoaded);
        if !matches!(previous, LoadState::NotLoaded) {
            info!("Transcoder torn down (was {:?})", previous);
        }
    }

    fn start_load_if_idle(&self) {
        let start = self.state.send_if_modified(|state| match state {
            LoadState::NotLoaded | LoadState::Failed(_) => {
                *state = LoadState::Loading;
                true
            }
            _ => false,
        });
        if !start {
            return;
        }

        debug!("Loading transcoder");
        let loader = Arc::clone(&self.loader);
        let state = Arc::clone(&self.state);
        let task = tokio::spawn(async move {
            let next = match loader.load().await {
                Ok(codec) => {
                    info!("Transcoder loaded: {}", codec.name());
                    LoadState::Loaded(codec)
                }
                Err(e) => {
                    warn!("{}", e);
                    LoadState::Failed(match e {
                        EngineError::LoadFailed(reason) => reason,
                        other => other.to_string(),
                    })
                }
            };
            // A teardown while loading wins over a late result
            state.send_if_modified(|current| {
                if matches!(current, LoadState::Loading) {
                    *current = next;
                    true
                } else {
                    false
                }
            });
        });
        *self.load_task.lock() = Some(task);
    }
}

impl Drop for CodecSlot {
    fn drop(&mut self) {
        if let Some(task) = self.load_task.lock().take() {
            task.abort();
        }
    }
}

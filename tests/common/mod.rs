// Scripted codec and loader shared by the engine-facing tests
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use typecast::transcode::{Codec, CodecLoader, ProgressReporter, TranscodeJob, TranscodeOutput};
use typecast::{
    ConversionCoordinator, ConversionProgress, CoordinatorConfig, EngineError, EngineSettings, SourceMedia,
    TranscodeEngine,
};

/// How the scripted codec behaves
#[derive(Debug, Clone)]
pub struct Script {
    /// Delay before each load; index = load number, last entry repeats
    pub load_delays: Vec<Duration>,
    pub fail_load: bool,
    /// Percentages reported during a conversion
    pub steps: Vec<u8>,
    pub step_delay: Duration,
    /// Fail the conversion with this reason
    pub fail_with: Option<String>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            load_delays: vec![Duration::ZERO],
            fail_load: false,
            steps: vec![10, 35, 60, 85],
            step_delay: Duration::from_millis(5),
            fail_with: None,
        }
    }
}

pub struct ScriptedCodec {
    script: Script,
}

#[async_trait]
impl Codec for ScriptedCodec {
    async fn transcode(&self, job: &TranscodeJob, progress: &mut ProgressReporter) -> Result<TranscodeOutput, EngineError> {
        for step in &self.script.steps {
            tokio::time::sleep(self.script.step_delay).await;
            progress.report(*step);
        }
        if let Some(reason) = &self.script.fail_with {
            return Err(EngineError::TranscodeFailed(reason.clone()));
        }
        let mut data = b"converted:".to_vec();
        data.extend_from_slice(&job.source.data);
        Ok(TranscodeOutput {
            data,
            mime_type: job.options.format.mime_type().to_string(),
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

pub struct ScriptedLoader {
    script: Script,
    loads: AtomicUsize,
}

impl ScriptedLoader {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            loads: AtomicUsize::new(0),
        })
    }

    /// Number of loads that started
    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CodecLoader for ScriptedLoader {
    async fn load(&self) -> Result<Arc<dyn Codec>, EngineError> {
        let n = self.loads.fetch_add(1, Ordering::SeqCst);
        let delays = &self.script.load_delays;
        let delay = delays.get(n).or(delays.last()).copied().unwrap_or_default();
        tokio::time::sleep(delay).await;
        if self.script.fail_load {
            return Err(EngineError::LoadFailed("scripted load failure".to_string()));
        }
        Ok(Arc::new(ScriptedCodec {
            script: self.script.clone(),
        }))
    }

    fn probe(&self) -> bool {
        true
    }
}

/// A coordinator over a real engine thread running the scripted codec
pub fn coordinator(script: Script, load_timeout: Duration) -> (Arc<ScriptedLoader>, ConversionCoordinator) {
    let loader = ScriptedLoader::new(script);
    let engine = TranscodeEngine::spawn(loader.clone(), EngineSettings { load_timeout }).unwrap();
    let coordinator = ConversionCoordinator::new(
        engine,
        CoordinatorConfig {
            cancel_ack_timeout: Duration::from_secs(2),
        },
    );
    (loader, coordinator)
}

pub fn webm_source() -> SourceMedia {
    SourceMedia {
        data: vec![7u8; 64],
        mime_type: "video/webm".to_string(),
        duration_ms: Some(2000),
    }
}

/// Collects progress reports handed to a callback
#[derive(Clone, Default)]
pub struct ProgressLog(Arc<Mutex<Vec<ConversionProgress>>>);

impl ProgressLog {
    pub fn callback(&self) -> impl Fn(ConversionProgress) + Send + Sync + 'static {
        let log = Arc::clone(&self.0);
        move |p| log.lock().push(p)
    }

    pub fn entries(&self) -> Vec<ConversionProgress> {
        self.0.lock().clone()
    }

    pub fn percents(&self) -> Vec<u8> {
        self.0.lock().iter().map(|p| p.percent).collect()
    }
}

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use typecast::{
    create_router, AppState, CaptureSession, Config, ConversionCoordinator, ConversionOutcome, DeliveryRequest,
    DirectorySink, OutputFormat, PipelineOrchestrator, SourceMedia, TranscodeEngine,
};

#[derive(Parser)]
#[command(name = "typecast")]
#[command(version, about = "Capture the screen and transcode it for delivery")]
struct Args {
    /// Config file, with or without extension
    #[arg(short, long, default_value = "config/typecast")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP control API
    Serve,

    /// Record for a fixed time, then deliver
    Record {
        /// Seconds to record; Ctrl-C stops early
        #[arg(short, long, default_value = "10")]
        seconds: u64,

        /// Delivery format (defaults to output.format)
        #[arg(short, long)]
        format: Option<OutputFormat>,
    },

    /// Convert an existing file
    Convert {
        input: PathBuf,

        #[arg(short, long)]
        format: Option<OutputFormat>,

        /// Output path (defaults to the input with the new extension)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Report capture and transcode capabilities
    Probe,
}

struct Pipeline {
    session: CaptureSession,
    orchestrator: Arc<PipelineOrchestrator>,
    output_dir: PathBuf,
}

fn build_pipeline(cfg: &Config) -> Result<Pipeline> {
    let output_dir = cfg.output_dir()?;
    let engine = TranscodeEngine::spawn(cfg.codec_loader(), cfg.engine_settings())
        .context("Failed to start transcode engine")?;
    let coordinator = Arc::new(ConversionCoordinator::new(engine, cfg.coordinator_config()));
    let sink = Arc::new(DirectorySink::new(&output_dir, &cfg.output.file_prefix));
    let orchestrator = Arc::new(PipelineOrchestrator::new(coordinator, cfg.pipeline_defaults()).with_sink(sink));
    let session = CaptureSession::new(cfg.capture_backend(), cfg.session_config());

    Ok(Pipeline {
        session,
        orchestrator,
        output_dir,
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let cfg = Config::load(&args.config)?;

    info!("Typecast v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);

    match args.command {
        Command::Serve => serve(&cfg).await,
        Command::Record { seconds, format } => record(&cfg, seconds, format).await,
        Command::Convert { input, format, output } => convert(&cfg, input, format, output).await,
        Command::Probe => probe(&cfg).await,
    }
}

async fn serve(cfg: &Config) -> Result<()> {
    let pipeline = build_pipeline(cfg)?;
    let session = pipeline.session.clone();
    let state = AppState::new(
        pipeline.session,
        pipeline.orchestrator,
        cfg.capture_options(),
        pipeline.output_dir,
    );
    let router = create_router(state);

    let addr = cfg.http_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("HTTP server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;

    if session.cancel().await {
        warn!("Discarded an unfinished recording on shutdown");
    }
    Ok(())
}

async fn record(cfg: &Config, seconds: u64, format: Option<OutputFormat>) -> Result<()> {
    let pipeline = build_pipeline(cfg)?;
    let session = pipeline.session;

    let mut events = session.subscribe();
    let stream = session.start(cfg.capture_options()).await?;
    info!("Recording {} for {} seconds (Ctrl-C to stop early)", stream.mime_type, seconds);

    let ended_by_host = async {
        loop {
            match events.recv().await {
                Ok(typecast::SessionEvent::Terminated { reason, .. }) => return reason,
                Ok(_) | Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
            }
        }
    };
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(seconds)) => {}
        _ = tokio::signal::ctrl_c() => info!("Stopping early"),
        // The session keeps what it sealed; finish() below delivers it
        reason = ended_by_host => warn!("Capture ended by host: {}", reason),
    }

    let request = DeliveryRequest {
        format,
        ..DeliveryRequest::default()
    };
    let report = pipeline
        .orchestrator
        .finish(&session, request, |p| info!("{:?} {}% {}", p.stage, p.percent, p.message))
        .await?;

    if let Some(warning) = &report.warning {
        warn!("{}", warning);
    }
    for stored in &report.stored {
        info!("Saved {:?}: {} ({} bytes)", stored.role, stored.location, stored.size_bytes);
    }
    Ok(())
}

async fn convert(cfg: &Config, input: PathBuf, format: Option<OutputFormat>, output: Option<PathBuf>) -> Result<()> {
    let data = tokio::fs::read(&input)
        .await
        .with_context(|| format!("Failed to read {:?}", input))?;
    let mime_type = input
        .extension()
        .and_then(|e| e.to_str())
        .and_then(|e| e.parse::<OutputFormat>().ok())
        .map(|f| f.mime_type())
        .unwrap_or("application/octet-stream")
        .to_string();

    let mut options = cfg.conversion_options();
    if let Some(format) = format {
        options.format = format;
    }
    let output = output.unwrap_or_else(|| input.with_extension(options.format.extension()));

    let engine = TranscodeEngine::spawn(cfg.codec_loader(), cfg.engine_settings())
        .context("Failed to start transcode engine")?;
    let coordinator = Arc::new(ConversionCoordinator::new(engine, cfg.coordinator_config()));

    let cancel = Arc::clone(&coordinator);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let source = SourceMedia {
        data,
        mime_type,
        duration_ms: None,
    };
    match coordinator
        .convert(source, options, |p| info!("{:?} {}%", p.stage, p.percent))
        .await?
    {
        ConversionOutcome::Completed(result) => {
            tokio::fs::write(&output, &result.buffer)
                .await
                .with_context(|| format!("Failed to write {:?}", output))?;
            info!(
                "Wrote {:?} ({} bytes, {}ms)",
                output, result.size_bytes, result.elapsed_ms
            );
        }
        ConversionOutcome::Cancelled => info!("Conversion cancelled"),
    }
    Ok(())
}

async fn probe(cfg: &Config) -> Result<()> {
    let pipeline = build_pipeline(cfg)?;
    let coordinator = pipeline.orchestrator.coordinator();

    info!("Capture backend: {}", cfg.capture.backend);
    info!("Capture supported: {}", pipeline.session.is_supported().await);
    info!("Transcoder available: {}", coordinator.is_available().await);

    let started = std::time::Instant::now();
    match coordinator.preload().await {
        Ok(()) => info!("Transcoder loaded in {}ms", started.elapsed().as_millis()),
        Err(e) => warn!("Transcoder failed to load: {}", e),
    }
    Ok(())
}

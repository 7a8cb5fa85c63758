use super::state::AppState;
use crate::conversion::CoordinatorState;
use crate::error::{CaptureError, ConversionError, PipelineError};
use crate::pipeline::{DeliveryReport, DeliveryRequest};
use crate::session::{CaptureOptions, SessionStats};
use crate::transcode::{ConversionProgress, OutputFormat};
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{error, info, warn};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitiesResponse {
    pub capture_supported: bool,
    pub transcode_available: bool,
    pub formats: Vec<OutputFormat>,
    pub default_format: OutputFormat,
}

#[derive(Debug, Serialize)]
pub struct ControlResponse {
    /// Whether the call changed anything
    pub changed: bool,
    pub stats: SessionStats,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionStatusResponse {
    pub state: CoordinatorState,
    pub progress: Option<ConversionProgress>,
    pub last_report: Option<DeliveryReport>,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorResponse { error: message.into() })).into_response()
}

/// Parse a JSON body that may be left out. An empty body means defaults;
/// anything else must parse.
fn optional_json<T: DeserializeOwned>(body: &[u8]) -> Result<Option<T>, Response> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(body)
        .map(Some)
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, format!("Invalid request body: {}", e)))
}

fn capture_status_code(e: &CaptureError) -> StatusCode {
    match e {
        CaptureError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        CaptureError::AlreadyRecording | CaptureError::NotRecording => StatusCode::CONFLICT,
        CaptureError::Unsupported(_) => StatusCode::SERVICE_UNAVAILABLE,
        CaptureError::Backend(_) | CaptureError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn pipeline_status_code(e: &PipelineError) -> StatusCode {
    match e {
        PipelineError::Capture(e) => capture_status_code(e),
        PipelineError::Conversion(e) => match e {
            ConversionError::ConversionInProgress => StatusCode::CONFLICT,
            ConversionError::InvalidOptions(_) => StatusCode::BAD_REQUEST,
            ConversionError::EngineLoadTimeout => StatusCode::GATEWAY_TIMEOUT,
            ConversionError::EngineLoadFailed(_) | ConversionError::EngineUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ConversionError::TranscodeFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
        },
        PipelineError::Sink(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /capabilities
pub async fn capabilities(State(state): State<AppState>) -> impl IntoResponse {
    let capture_supported = state.session.is_supported().await;
    let transcode_available = state.orchestrator.coordinator().is_available().await;

    Json(CapabilitiesResponse {
        capture_supported,
        transcode_available,
        formats: vec![OutputFormat::Mp4, OutputFormat::Webm, OutputFormat::Gif, OutputFormat::Ts],
        default_format: state.orchestrator.defaults().options.format,
    })
}

/// POST /capture/start
/// Body is optional; configured defaults apply without one
pub async fn start_capture(State(state): State<AppState>, body: Bytes) -> Response {
    let options = match optional_json::<CaptureOptions>(&body) {
        Ok(options) => options.unwrap_or(state.capture_defaults),
        Err(rejection) => return rejection,
    };

    match state.session.start(options).await {
        Ok(info) => {
            info!("Capture started over HTTP ({})", info.mime_type);
            (StatusCode::OK, Json(info)).into_response()
        }
        Err(e) => {
            warn!("Failed to start capture: {}", e);
            error_response(capture_status_code(&e), e.to_string())
        }
    }
}

/// POST /capture/pause
pub async fn pause_capture(State(state): State<AppState>) -> impl IntoResponse {
    let changed = state.session.pause().await;
    Json(ControlResponse {
        changed,
        stats: state.session.stats().await,
    })
}

/// POST /capture/resume
pub async fn resume_capture(State(state): State<AppState>) -> impl IntoResponse {
    let changed = state.session.resume().await;
    Json(ControlResponse {
        changed,
        stats: state.session.stats().await,
    })
}

/// POST /capture/cancel
/// Discard the recording
pub async fn cancel_capture(State(state): State<AppState>) -> impl IntoResponse {
    let changed = state.session.cancel().await;
    Json(ControlResponse {
        changed,
        stats: state.session.stats().await,
    })
}

/// POST /capture/stop
/// Stop recording and deliver the result; converts when the requested
/// format differs from the captured one
pub async fn stop_capture(State(state): State<AppState>, body: Bytes) -> Response {
    let request = match optional_json::<DeliveryRequest>(&body) {
        Ok(request) => request.unwrap_or_default(),
        Err(rejection) => return rejection,
    };

    let progress = state.progress.clone();
    let on_progress = move |p: ConversionProgress| {
        *progress.lock() = Some(p);
    };

    let result = state.orchestrator.finish(&state.session, request, on_progress).await;
    *state.progress.lock() = None;

    match result {
        Ok(report) => {
            if let Some(warning) = &report.warning {
                warn!("Delivered with warning: {}", warning);
            }
            *state.last_report.lock() = Some(report.clone());
            (StatusCode::OK, Json(report)).into_response()
        }
        Err(e) => {
            error!("Failed to deliver capture: {}", e);
            error_response(pipeline_status_code(&e), e.to_string())
        }
    }
}

/// GET /capture/status
pub async fn capture_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.session.stats().await)
}

/// GET /conversion/status
pub async fn conversion_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(ConversionStatusResponse {
        state: state.orchestrator.coordinator().state(),
        progress: state.progress.lock().clone(),
        last_report: state.last_report.lock().clone(),
    })
}

/// POST /conversion/cancel
pub async fn cancel_conversion(State(state): State<AppState>) -> impl IntoResponse {
    let cancelled = state.orchestrator.coordinator().cancel();
    Json(serde_json::json!({ "cancelled": cancelled }))
}

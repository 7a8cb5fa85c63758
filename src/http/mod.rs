//! HTTP API server for external control
//!
//! This module provides a REST API for driving the capture pipeline:
//! - POST /capture/start, /capture/pause, /capture/resume, /capture/cancel
//! - POST /capture/stop - Stop and deliver, converting if needed
//! - GET /capture/status - Session statistics
//! - GET /conversion/status, POST /conversion/cancel
//! - GET /artifacts/* - Delivered files
//! - GET /health, GET /capabilities

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;

//! HTTP surface for camera producers, stream viewers and status pollers.

pub mod error;

use std::{convert::Infallible, future::Future, sync::Arc};

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, State},
    http::{
        header::{CACHE_CONTROL, CONTENT_TYPE},
        HeaderMap, HeaderValue,
    },
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use spillwatch_control::ControlSurface;
use spillwatch_stream::FrameBroadcaster;
use spillwatch_types::{
    events::DetectionEvent,
    status::{epoch_seconds, StatusReport},
};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

pub use error::ApiError;

/// Shared secret header sent by the camera process.
pub const AUTH_HEADER: &str = "x-camera-auth";
/// Per-upload detector verdict, `true` or `false`.
pub const DETECTION_HEADER: &str = "x-oil-spill-detected";

/// Shared state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub control: Arc<ControlSurface>,
    pub broadcaster: FrameBroadcaster,
}

/// JSON response for `/api/status`
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub stream_active: bool,
    pub last_frame_time: Option<f64>,
    pub frame_age_seconds: Option<f64>,
    pub server_time: f64,
    pub detection_active: bool,
    pub total_events: usize,
}

impl From<StatusReport> for StatusResponse {
    fn from(report: StatusReport) -> Self {
        Self {
            stream_active: report.stream_active,
            last_frame_time: report.last_frame_time.map(epoch_seconds),
            frame_age_seconds: report.frame_age_seconds,
            server_time: epoch_seconds(report.server_time),
            detection_active: report.detection_active,
            total_events: report.total_events,
        }
    }
}

/// One entry of `/api/oil_spill_events`
#[derive(Debug, Serialize, Deserialize)]
pub struct EventResponse {
    pub timestamp: String,
    pub datetime: String,
    pub frame_path: String,
}

impl From<&DetectionEvent> for EventResponse {
    fn from(event: &DetectionEvent) -> Self {
        Self {
            timestamp: event.id.clone(),
            datetime: event.detected_at.to_rfc3339(),
            frame_path: event.frame_path.display().to_string(),
        }
    }
}

/// JSON response for `/api/detection_summary`
#[derive(Debug, Serialize, Deserialize)]
pub struct SummaryResponse {
    pub current_status: String,
    pub total_events: usize,
    pub last_detection: Option<String>,
}

/// JSON response for stream control commands
#[derive(Debug, Serialize, Deserialize)]
pub struct ControlResponse {
    pub status: String,
}

#[derive(Deserialize)]
struct PasswordBody {
    password: Option<String>,
}

/// Password carried by a control request. Unparsable bodies count as absent.
fn password_from(body: &[u8]) -> Option<String> {
    serde_json::from_slice::<PasswordBody>(body)
        .ok()
        .and_then(|parsed| parsed.password)
}

fn detection_flag(headers: &HeaderMap) -> bool {
    headers
        .get(DETECTION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "true" | "1" | "yes"
            )
        })
        .unwrap_or(false)
}

/// GET / - Liveness
async fn index() -> &'static str {
    "Video Streaming Server is running"
}

/// GET /stream - multipart live feed
async fn stream(State(state): State<AppState>) -> Result<Response, ApiError> {
    let frames = state.broadcaster.open().await?;
    let body = Body::from_stream(frames.map(Ok::<_, Infallible>));
    Ok((
        [
            (
                CONTENT_TYPE,
                HeaderValue::from_static(spillwatch_stream::CONTENT_TYPE),
            ),
            (CACHE_CONTROL, HeaderValue::from_static("no-cache, no-store")),
        ],
        body,
    )
        .into_response())
}

/// GET /api/frame - latest JPEG
async fn latest_frame(State(state): State<AppState>) -> Result<Response, ApiError> {
    let frame = state.control.latest_frame()?;
    Ok((
        [(CONTENT_TYPE, HeaderValue::from_static("image/jpeg"))],
        frame.data.clone(),
    )
        .into_response())
}

/// GET /api/status
async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(state.control.status().into())
}

/// GET /api/oil_spill_events - detection history, oldest first
async fn events(State(state): State<AppState>) -> Json<Vec<EventResponse>> {
    Json(state.control.events().iter().map(EventResponse::from).collect())
}

/// GET /api/detection_summary
async fn detection_summary(State(state): State<AppState>) -> Json<SummaryResponse> {
    let summary = state.control.summary();
    let current_status = if state.control.store().detection_active() {
        "oil_spill_detected"
    } else {
        "clear"
    };
    Json(SummaryResponse {
        current_status: current_status.into(),
        total_events: summary.total_events,
        last_detection: summary.last_detection.map(|at| at.to_rfc3339()),
    })
}

/// POST /api/upload_frame - raw JPEG body from the camera
async fn upload_frame(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<&'static str, ApiError> {
    let auth = headers.get(AUTH_HEADER).and_then(|value| value.to_str().ok());
    state
        .control
        .upload_frame(body, detection_flag(&headers), auth)
        .await?;
    Ok("Frame received")
}

/// POST /api/start_stream
async fn start_stream(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<ControlResponse>, ApiError> {
    state.control.start_stream(password_from(&body).as_deref())?;
    Ok(Json(ControlResponse {
        status: "Stream started".into(),
    }))
}

/// POST /api/stop_stream
async fn stop_stream(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<ControlResponse>, ApiError> {
    state.control.stop_stream(password_from(&body).as_deref())?;
    Ok(Json(ControlResponse {
        status: "Stream stopped".into(),
    }))
}

/// Create the HTTP router
pub fn create_router(state: AppState, max_upload_bytes: usize) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index))
        .route("/stream", get(stream))
        .route("/api/frame", get(latest_frame))
        .route("/api/status", get(status))
        .route("/api/oil_spill_events", get(events))
        .route("/api/detection_summary", get(detection_summary))
        .route(
            "/api/upload_frame",
            post(upload_frame).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .route("/api/start_stream", post(start_stream))
        .route("/api/stop_stream", post(stop_stream))
        .layer(cors)
        .with_state(state)
}

/// Serve `router` on `listener` until `shutdown` resolves. Open viewer
/// streams are ended through the broadcaster so the graceful drain completes.
pub async fn serve<F>(
    listener: tokio::net::TcpListener,
    router: Router,
    broadcaster: FrameBroadcaster,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("HTTP server listening on {}", addr);
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown.await;
            broadcaster.shutdown();
        })
        .await
}

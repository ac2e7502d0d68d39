//! HTTP API
//!
//! JSON endpoints over the error log, status snapshot, link health and
//! command dispatch, plus Prometheus text at `/metrics`. Command endpoints
//! only enqueue: they answer 202 as soon as the command is queued.
//!
//! An error popup can be followed by polling `.../delta` or by holding the
//! `.../events` SSE stream open. The stream opens the popup itself and
//! closes it when the client goes away.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use futures::Stream;
use icd::{Axis, AxisMotion, AxisSet, EmergencyCommand, FeedSet, FirmwareInfo, ReadData};
use pedestal_types::{
    ErrorLogEntry, ErrorLogFilter, Page, PopupDelta, PopupSnapshot, StatusBarSummary, StowState,
    UdpHealth,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::time::MissedTickBehavior;
use tokio_stream::wrappers::{BroadcastStream, WatchStream};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::control_state::{AxisValues, ControlSnapshot};
use crate::dispatch::CommandHandle;
use crate::error::PedestalError;
use crate::error_log::ErrorLogStore;
use crate::service::Pedestal;

type AppState = Arc<Pedestal>;

/// Error response with a JSON `{"error": ...}` body.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl From<PedestalError> for ApiError {
    fn from(e: PedestalError) -> Self {
        match e {
            PedestalError::PopupNotOpen(_) => ApiError::NotFound(e.to_string()),
            PedestalError::Command(_) => ApiError::BadRequest(e.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandAccepted {
    pub command: &'static str,
}

fn accepted(handle: CommandHandle) -> (StatusCode, Json<CommandAccepted>) {
    let command = handle.kind().name();
    drop(handle);
    (StatusCode::ACCEPTED, Json(CommandAccepted { command }))
}

fn axis_set(axes: &[Axis]) -> ApiResult<AxisSet> {
    if axes.is_empty() {
        return Err(ApiError::BadRequest("No axes selected".to_string()));
    }
    Ok(AxisSet::from_axes(axes.iter().copied()))
}

#[derive(Debug, Deserialize)]
pub struct AxesRequest {
    pub axes: Vec<Axis>,
}

#[derive(Debug, Deserialize)]
pub struct ManualControlRequest {
    pub axes: Vec<Axis>,
    #[serde(default)]
    pub azimuth: AxisMotion,
    #[serde(default)]
    pub elevation: AxisMotion,
    #[serde(default)]
    pub train: AxisMotion,
    /// Set the STOW flag on the selector byte
    #[serde(default)]
    pub stow: bool,
}

#[derive(Debug, Deserialize)]
pub struct PositionOffsetRequest {
    pub axes: Vec<Axis>,
    #[serde(default)]
    pub azimuth: f32,
    #[serde(default)]
    pub elevation: f32,
    #[serde(default)]
    pub train: f32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeOffsetRequest {
    pub offset_ms: f32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FeedRequest {
    pub s_rx: bool,
    pub x_rx: bool,
    pub ka_rx: bool,
    pub x_tx: bool,
}

impl FeedRequest {
    fn feeds(&self) -> FeedSet {
        let mut feeds = FeedSet::empty();
        feeds.set(FeedSet::S_RX, self.s_rx);
        feeds.set(FeedSet::X_RX, self.x_rx);
        feeds.set(FeedSet::KA_RX, self.ka_rx);
        feeds.set(FeedSet::X_TX, self.x_tx);
        feeds
    }
}

/// Latest status frame together with the command-side projection.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    pub status: ReadData,
    pub age_ms: u64,
    pub control: ControlSnapshot,
}

// Error log

async fn list_errors(State(p): State<AppState>) -> Json<Vec<ErrorLogEntry>> {
    Json(p.error_log().all())
}

async fn active_errors(State(p): State<AppState>) -> Json<Vec<ErrorLogEntry>> {
    Json(p.error_log().active())
}

async fn search_errors(
    State(p): State<AppState>,
    Query(filter): Query<ErrorLogFilter>,
) -> Json<Page<ErrorLogEntry>> {
    Json(p.error_log().search(&filter))
}

async fn status_bar(State(p): State<AppState>) -> Json<StatusBarSummary> {
    Json(p.error_log().status_bar(Utc::now()))
}

async fn open_popup(State(p): State<AppState>, Path(client): Path<String>) -> Json<PopupSnapshot> {
    Json(p.error_log().open_popup(&client, Utc::now()))
}

async fn popup_delta(
    State(p): State<AppState>,
    Path(client): Path<String>,
) -> ApiResult<Json<PopupDelta>> {
    Ok(Json(p.error_log().popup_delta(&client, Utc::now())?))
}

async fn close_popup(
    State(p): State<AppState>,
    Path(client): Path<String>,
) -> ApiResult<StatusCode> {
    if p.error_log().close_popup(&client) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(PedestalError::PopupNotOpen(client).into())
    }
}

/// Closes the popup when the SSE stream is dropped.
struct PopupGuard {
    store: Arc<ErrorLogStore>,
    client: String,
}

impl Drop for PopupGuard {
    fn drop(&mut self) {
        self.store.close_popup(&self.client);
        debug!("Popup stream for {} closed", self.client);
    }
}

fn json_event(name: &str, value: &impl Serialize) -> Option<Event> {
    match serde_json::to_string(value) {
        Ok(json) => Some(Event::default().event(name).data(json)),
        Err(e) => {
            warn!("Failed to serialize {} event: {}", name, e);
            None
        }
    }
}

async fn popup_events(
    State(p): State<AppState>,
    Path(client): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let store = p.error_log().clone();
    let push_interval = p.config().error_log.popup_push_interval;
    let snapshot = store.open_popup(&client, Utc::now());
    info!("Popup stream opened for {}", client);
    let guard = PopupGuard {
        store: store.clone(),
        client,
    };

    let stream = async_stream::stream! {
        let guard = guard;
        if let Some(event) = json_event("snapshot", &snapshot) {
            yield Ok(event);
        }

        let mut ticker = tokio::time::interval(push_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match store.popup_delta(&guard.client, Utc::now()) {
                Ok(delta) if delta.is_empty() => {}
                Ok(delta) => {
                    if let Some(event) = json_event("delta", &delta) {
                        yield Ok(event);
                    }
                }
                // Closed through the REST endpoint
                Err(_) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(keep_alive())
}

// Link

async fn status(State(p): State<AppState>) -> ApiResult<Json<StatusView>> {
    let snapshot = p
        .snapshot()
        .snapshot()
        .ok_or_else(|| ApiError::NotFound("No status frame received yet".to_string()))?;
    Ok(Json(StatusView {
        status: (*snapshot.data).clone(),
        age_ms: snapshot.received_at.elapsed().as_millis() as u64,
        control: p.control().snapshot(),
    }))
}

async fn firmware(State(p): State<AppState>) -> ApiResult<Json<FirmwareInfo>> {
    p.firmware()
        .latest()
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("No firmware info received yet".to_string()))
}

async fn udp_health(State(p): State<AppState>) -> Json<UdpHealth> {
    Json(p.link().health())
}

async fn udp_reconnect(State(p): State<AppState>) -> StatusCode {
    let link = p.link().clone();
    tokio::spawn(async move {
        if !link.reconnect().await {
            info!("Reconnect abandoned by shutdown");
        }
    });
    StatusCode::ACCEPTED
}

async fn metrics(State(p): State<AppState>) -> Response {
    match p.metrics().render() {
        Ok(text) => (StatusCode::OK, text).into_response(),
        Err(e) => {
            warn!("Failed to render metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, format!("Error: {e}")).into_response()
        }
    }
}

// Commands

async fn manual_control(
    State(p): State<AppState>,
    Json(req): Json<ManualControlRequest>,
) -> ApiResult<impl IntoResponse> {
    let mut axes = axis_set(&req.axes)?;
    axes.set(AxisSet::STOW, req.stow);
    let targets = AxisValues {
        azimuth: req.azimuth,
        elevation: req.elevation,
        train: req.train,
    };
    Ok(accepted(p.dispatcher().manual_control(axes, targets)))
}

async fn stop(
    State(p): State<AppState>,
    Json(req): Json<AxesRequest>,
) -> ApiResult<impl IntoResponse> {
    Ok(accepted(p.dispatcher().stop(axis_set(&req.axes)?)))
}

async fn standby(
    State(p): State<AppState>,
    Json(req): Json<AxesRequest>,
) -> ApiResult<impl IntoResponse> {
    Ok(accepted(p.dispatcher().standby(axis_set(&req.axes)?)))
}

async fn emergency(
    State(p): State<AppState>,
    Path(code): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let command = code
        .parse::<EmergencyCommand>()
        .map_err(PedestalError::from)?;
    Ok(accepted(p.dispatcher().emergency(command)))
}

async fn position_offset(
    State(p): State<AppState>,
    Json(req): Json<PositionOffsetRequest>,
) -> ApiResult<impl IntoResponse> {
    let offsets = AxisValues {
        azimuth: req.azimuth,
        elevation: req.elevation,
        train: req.train,
    };
    Ok(accepted(
        p.dispatcher().position_offset(axis_set(&req.axes)?, offsets),
    ))
}

async fn time_offset(
    State(p): State<AppState>,
    Json(req): Json<TimeOffsetRequest>,
) -> impl IntoResponse {
    accepted(p.dispatcher().time_offset(req.offset_ms))
}

async fn feed(State(p): State<AppState>, Json(req): Json<FeedRequest>) -> impl IntoResponse {
    accepted(p.dispatcher().feed_on_off(req.feeds()))
}

async fn servo_preset(
    State(p): State<AppState>,
    Json(req): Json<AxesRequest>,
) -> ApiResult<impl IntoResponse> {
    Ok(accepted(p.dispatcher().servo_preset(axis_set(&req.axes)?)))
}

async fn servo_alarm_reset(
    State(p): State<AppState>,
    Json(req): Json<AxesRequest>,
) -> ApiResult<impl IntoResponse> {
    Ok(accepted(p.dispatcher().servo_alarm_reset(axis_set(&req.axes)?)))
}

async fn firmware_info(State(p): State<AppState>) -> impl IntoResponse {
    accepted(p.dispatcher().firmware_info_request())
}

async fn time_sync(State(p): State<AppState>) -> impl IntoResponse {
    accepted(p.dispatcher().time_sync())
}

async fn start_stow(State(p): State<AppState>) -> impl IntoResponse {
    drop(p.stow().start());
    (StatusCode::ACCEPTED, Json(CommandAccepted { command: "Stow" }))
}

async fn cancel_stow(State(p): State<AppState>) -> Json<StowState> {
    p.stow().cancel();
    Json(p.stow().state())
}

async fn stow_state(State(p): State<AppState>) -> Json<StowState> {
    Json(p.stow().state())
}

fn keep_alive() -> KeepAlive {
    KeepAlive::default()
        .interval(Duration::from_secs(15))
        .text("keepalive")
}

/// Stow state on every transition, starting with the current one.
async fn stow_events(
    State(p): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = WatchStream::new(p.stow().subscribe())
        .filter_map(|state| json_event("stow", &state).map(Ok::<_, Infallible>));
    Sse::new(stream).keep_alive(keep_alive())
}

async fn tracking_events(
    State(p): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(p.events().subscribe()).filter_map(|result| match result {
        Ok(event) => json_event("tracking", &event).map(Ok::<_, Infallible>),
        // Lagged receivers skip what they missed
        Err(_) => None,
    });
    Sse::new(stream).keep_alive(keep_alive())
}

/// Build the API router.
pub fn router(pedestal: Arc<Pedestal>) -> Router {
    Router::new()
        .route("/api/error-log", get(list_errors))
        .route("/api/error-log/active", get(active_errors))
        .route("/api/error-log/search", get(search_errors))
        .route("/api/error-log/status-bar", get(status_bar))
        .route(
            "/api/error-log/popup/{client}",
            post(open_popup).delete(close_popup),
        )
        .route("/api/error-log/popup/{client}/delta", get(popup_delta))
        .route("/api/error-log/popup/{client}/events", get(popup_events))
        .route("/api/status", get(status))
        .route("/api/firmware", get(firmware))
        .route("/api/udp/health", get(udp_health))
        .route("/api/udp/reconnect", post(udp_reconnect))
        .route("/api/commands/manual", post(manual_control))
        .route("/api/commands/stop", post(stop))
        .route("/api/commands/standby", post(standby))
        .route("/api/commands/emergency/{code}", post(emergency))
        .route("/api/commands/offset/position", post(position_offset))
        .route("/api/commands/offset/time", post(time_offset))
        .route("/api/commands/feed", post(feed))
        .route("/api/commands/servo/preset", post(servo_preset))
        .route("/api/commands/servo/alarm-reset", post(servo_alarm_reset))
        .route("/api/commands/firmware-info", post(firmware_info))
        .route("/api/commands/time-sync", post(time_sync))
        .route("/api/commands/stow", post(start_stow).delete(cancel_stow))
        .route("/api/stow", get(stow_state))
        .route("/api/stow/events", get(stow_events))
        .route("/api/events/tracking", get(tracking_events))
        .route("/metrics", get(metrics))
        .with_state(pedestal)
}

/// Serve the API on `listener` until `shutdown` fires.
pub async fn serve(
    pedestal: Arc<Pedestal>,
    listener: TcpListener,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Pedestal API listening on http://{}", addr);
    }
    axum::serve(listener, router(pedestal))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

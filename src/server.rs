//! HTTP and WebSocket endpoints served by the gateway.
//!
//! # Architecture
//!
//! ```text
//!  browser ──→ static  :47800  (dashboard assets, no token)
//!          ──→ push    :47801  (WebSocket, token in Sec-WebSocket-Protocol)
//!          ──→ api     :47802  (JSON, X-Api-Token or Bearer)
//!                         │
//!            HistoryStore ┴ LiveBroadcaster ┴ SettingsStore
//! ```

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, Request, State,
    },
    http::HeaderMap,
    middleware::{self, Next},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::{Arc, Weak};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{debug, error, info, warn};

use crate::activity::ActivityStats;
use crate::collector::HistoryRecord;
use crate::core::{Extent, SubscriberKind};
use crate::error::{ApiError, GatewayError};
use crate::gateway::{EndpointKind, GatewayStatus, Services, TransportGateway};

pub const TOKEN_HEADER: &str = "x-api-token";
const WS_PROTOCOL_HEADER: &str = "sec-websocket-protocol";
const DEFAULT_RANGE_MS: i64 = 3_600_000;

/// Shared state for all three endpoints.
pub struct ServerState {
    services: Services,
    token: String,
    gateway: Weak<TransportGateway>,
    hostname: String,
}

impl ServerState {
    pub fn new(services: Services, token: String, gateway: Weak<TransportGateway>) -> Self {
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        Self {
            services,
            token,
            gateway,
            hostname,
        }
    }

    fn accepts(&self, candidate: &str) -> bool {
        constant_time_eq(candidate.as_bytes(), self.token.as_bytes())
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// `X-Api-Token` first, then `Authorization: Bearer`.
fn http_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .or_else(|| {
            headers
                .get(axum::http::header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
        })
        .map(str::trim)
}

/// Successful API envelope.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        success: true,
        data,
    })
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub hostname: String,
}

/// GET /health
async fn health(State(state): State<Arc<ServerState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        hostname: state.hostname.clone(),
    })
}

async fn require_token(
    State(state): State<Arc<ServerState>>,
    request: Request,
    next: Next,
) -> Response {
    match http_token(request.headers()) {
        Some(token) if state.accepts(token) => next.run(request).await,
        _ => {
            state.services.activity.record_rejected_connection();
            debug!(path = %request.uri().path(), "Rejected API request without valid token");
            ApiError::Unauthorized.into_response()
        }
    }
}

/// Query string of `GET /api/history` and friends. Values stay raw so bad
/// input falls back to defaults instead of failing extraction.
///
/// A query string that does not deserialize at all (duplicate keys, broken
/// encoding) is treated as empty.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryParams {
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub bucket_ms: Option<String>,
}

fn parse_millis(raw: Option<&str>) -> Option<i64> {
    let raw = raw?.trim();
    raw.parse::<i64>().ok().or_else(|| {
        raw.parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .map(|v| v as i64)
    })
}

/// Resolve `[start, end]`: end defaults to now, start to one hour before end,
/// and a reversed pair is swapped.
pub fn resolve_range(params: &HistoryParams, now: i64) -> (i64, i64) {
    let end = parse_millis(params.end_time.as_deref()).unwrap_or(now);
    let start = parse_millis(params.start_time.as_deref())
        .unwrap_or_else(|| end.saturating_sub(DEFAULT_RANGE_MS));
    if start > end {
        (end, start)
    } else {
        (start, end)
    }
}

fn params_or_default(query: Result<Query<HistoryParams>, QueryRejection>) -> HistoryParams {
    match query {
        Ok(Query(params)) => params,
        Err(e) => {
            debug!("Unreadable history query, using defaults: {}", e);
            HistoryParams::default()
        }
    }
}

/// GET /api/history
async fn history(
    State(state): State<Arc<ServerState>>,
    query: Result<Query<HistoryParams>, QueryRejection>,
) -> Result<Json<ApiResponse<Vec<HistoryRecord>>>, ApiError> {
    let params = params_or_default(query);
    let store = &state.services.store;
    let (start, end) = resolve_range(&params, store.now_millis());
    let samples = match parse_millis(params.bucket_ms.as_deref()) {
        Some(bucket) if bucket > 0 => store.query_buckets(start, end, bucket).await?,
        _ => store.query_range(start, end).await?,
    };
    Ok(ok(samples.iter().map(HistoryRecord::from).collect()))
}

/// GET /api/history/range
async fn history_extent(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<ApiResponse<Extent>>, ApiError> {
    Ok(ok(state.services.store.query_extent().await?))
}

/// GET /api/history/summary
async fn history_summary(
    State(state): State<Arc<ServerState>>,
    query: Result<Query<HistoryParams>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let params = params_or_default(query);
    let store = &state.services.store;
    let (start, end) = resolve_range(&params, store.now_millis());
    Ok(ok(store.summarize(start, end).await?))
}

/// GET /api/get-settings
async fn get_settings(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    ok(state.services.settings.get())
}

/// POST /api/update-settings
async fn update_settings(
    State(state): State<Arc<ServerState>>,
    body: Result<Json<serde_json::Value>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(patch) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let change = state.services.settings.apply_patch(&patch)?;

    let broadcaster = &state.services.broadcaster;
    if change.theme_changed {
        broadcaster.publish_theme(change.settings.theme);
    }
    broadcaster.publish_settings(change.settings.clone());
    info!("Settings updated through API");
    Ok(ok(change.settings))
}

#[derive(Debug, Deserialize)]
pub struct ToggleRequest {
    pub enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct ToggleResponse {
    pub enabled: bool,
}

/// POST /api/toggle-auto-start
async fn toggle_auto_start(
    State(state): State<Arc<ServerState>>,
    body: Result<Json<ToggleRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let settings = state.services.settings.set_auto_start(request.enabled)?;
    state.services.broadcaster.publish_settings(settings);
    Ok(ok(ToggleResponse {
        enabled: request.enabled,
    }))
}

/// POST /api/toggle-web-access
async fn toggle_web_access(
    State(state): State<Arc<ServerState>>,
    body: Result<Json<ToggleRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = body.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let gateway = state.gateway.upgrade().ok_or(GatewayError::Gone)?;
    let settings = gateway.set_web_access(request.enabled).await?;
    Ok(ok(ToggleResponse {
        enabled: settings.web_access_enabled,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub activity: ActivityStats,
    pub history: Option<Extent>,
    pub gateway: Option<GatewayStatus>,
    pub subscribers: usize,
}

/// GET /api/status
async fn status(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let history = state.services.store.query_extent().await.ok();
    let gateway = match state.gateway.upgrade() {
        Some(gateway) => Some(gateway.status().await),
        None => None,
    };
    ok(StatusResponse {
        activity: state.services.activity.stats(),
        history,
        gateway,
        subscribers: state.services.broadcaster.len(),
    })
}

/// Messages a push client may send.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    Ping,
    RequestSnapshot,
}

/// Token offered by a push client, if it matches.
///
/// Browsers can only pass it as a subprotocol; native clients may use the
/// API headers instead. The flag says whether the subprotocol must be echoed.
fn push_token(headers: &HeaderMap, state: &ServerState) -> Option<bool> {
    let via_protocol = headers
        .get_all(WS_PROTOCOL_HEADER)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|p| state.accepts(p.trim()));
    if via_protocol {
        return Some(true);
    }
    http_token(headers)
        .filter(|t| state.accepts(t))
        .map(|_| false)
}

/// GET / on the push endpoint
async fn push_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
) -> Response {
    let Some(echo_protocol) = push_token(&headers, &state) else {
        state.services.activity.record_rejected_connection();
        warn!("Rejected push connection without valid token");
        return ApiError::Unauthorized.into_response();
    };

    let ws = if echo_protocol {
        ws.protocols([state.token.clone()])
    } else {
        ws
    };
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<ServerState>) {
    let broadcaster = state.services.broadcaster.clone();
    let mut subscription = broadcaster.subscribe(SubscriberKind::Remote);
    let handle = subscription.handle();
    debug!(?handle, "Push connection established");

    if let Some(frame) = broadcaster.latest_frame() {
        if socket.send(Message::Text(frame.to_string())).await.is_err() {
            broadcaster.unsubscribe(handle);
            return;
        }
    }

    loop {
        tokio::select! {
            frame = subscription.recv() => {
                let Some(frame) = frame else {
                    // Dropped by the broadcaster, usually because the gateway is closing.
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                };
                if socket.send(Message::Text(frame.to_string())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if reply(&mut socket, &state, &text).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("Push connection error: {}", e);
                        break;
                    }
                }
            }
        }
    }

    broadcaster.unsubscribe(handle);
    debug!(?handle, "Push connection closed");
}

async fn reply(socket: &mut WebSocket, state: &ServerState, text: &str) -> Result<(), axum::Error> {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            debug!("Ignoring unknown push message: {}", e);
            return Ok(());
        }
    };

    let frame = match message {
        ClientMessage::Ping => Some(
            serde_json::json!({
                "type": "pong",
                "data": { "timestamp": state.services.store.now_millis() },
            })
            .to_string(),
        ),
        ClientMessage::RequestSnapshot => state
            .services
            .broadcaster
            .latest_frame()
            .map(|f| f.to_string()),
    };

    match frame {
        Some(frame) => socket.send(Message::Text(frame)).await,
        None => Ok(()),
    }
}

const PLACEHOLDER_PAGE: &str = r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>sysdeck</title></head>
<body>
<h1>sysdeck</h1>
<p>No dashboard assets are installed. Set <code>web_root</code> in the config file.</p>
</body>
</html>
"#;

async fn placeholder() -> Html<&'static str> {
    Html(PLACEHOLDER_PAGE)
}

/// Build the router for one endpoint.
pub fn router(kind: EndpointKind, state: Arc<ServerState>, web_root: Option<&Path>) -> Router {
    let app = match kind {
        EndpointKind::Static => {
            let base = Router::new().route("/health", get(health));
            match web_root {
                Some(root) => base.fallback_service(ServeDir::new(root)),
                None => base.fallback(placeholder),
            }
        }
        EndpointKind::Push => Router::new()
            .route("/", get(push_upgrade))
            .route("/ws", get(push_upgrade))
            .route("/health", get(health)),
        EndpointKind::Api => {
            let api = Router::new()
                .route("/history", get(history))
                .route("/history/range", get(history_extent))
                .route("/history/summary", get(history_summary))
                .route("/get-settings", get(get_settings))
                .route("/update-settings", post(update_settings))
                .route("/toggle-auto-start", post(toggle_auto_start))
                .route("/toggle-web-access", post(toggle_web_access))
                .route("/status", get(status))
                .route_layer(middleware::from_fn_with_state(state.clone(), require_token));
            Router::new()
                .route("/health", get(health))
                .nest("/api", api)
        }
    };

    app.with_state(state).layer(CorsLayer::permissive())
}

/// Serve `app` until `shutdown` fires.
pub async fn serve(
    kind: EndpointKind,
    listener: TcpListener,
    app: Router,
    shutdown: oneshot::Receiver<()>,
) {
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.await;
            debug!("{} endpoint shutdown signal received", kind.name());
        })
        .await
    {
        error!("{} endpoint error: {}", kind.name(), e);
    }
}

//! axum HTTP transport (spec.md §4.6). Grounded directly on
//! `api::{server, middleware}`: the same `Router` composition shape, the
//! same `tower_http::{cors, trace}` layers, and `rate_limit_middleware`/
//! `security_headers_middleware` kept in the teacher's idiom. `auth_middleware`
//! has no counterpart here — the gateway trusts its transport peer by design.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::Stream;
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use super::{DispatchError, GatewayState};
use crate::types::{ErrorKind, ToolRequest};

#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    pub bind_address: String,
    pub port: u16,
    pub enable_cors: bool,
    pub enable_tracing: bool,
    pub enable_rate_limiting: bool,
    pub prometheus_enabled: bool,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            enable_cors: true,
            enable_tracing: true,
            enable_rate_limiting: true,
            prometheus_enabled: true,
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(ErrorBody { error: message.into() })).into_response()
}

impl IntoResponse for DispatchError {
    fn into_response(self) -> Response {
        match &self {
            DispatchError::UnknownTool(_) => error_response(StatusCode::NOT_FOUND, self.to_string()),
            DispatchError::ToolDisabled(_) => error_response(StatusCode::FORBIDDEN, self.to_string()),
        }
    }
}

async fn health_handler(State(state): State<GatewayState>) -> Response {
    match state.health.latest().await {
        Some(health) => {
            let code = StatusCode::from_u16(health.status.http_status()).unwrap_or(StatusCode::OK);
            (code, Json(health)).into_response()
        }
        None => error_response(StatusCode::SERVICE_UNAVAILABLE, "no health cycle has run yet"),
    }
}

async fn list_tools_handler(State(state): State<GatewayState>) -> Response {
    Json(super::list_tools(&state).await).into_response()
}

async fn execute_handler(
    State(state): State<GatewayState>,
    Path(name): Path<String>,
    Json(request): Json<ToolRequest>,
) -> Response {
    match super::execute_tool(&state, &name, request).await {
        Ok(result) => {
            let status = if result.error_kind == Some(ErrorKind::ValidationError) {
                StatusCode::BAD_REQUEST
            } else {
                StatusCode::OK
            };
            (status, Json(result)).into_response()
        }
        Err(e) => e.into_response(),
    }
}

async fn enable_handler(State(state): State<GatewayState>, Path(name): Path<String>) -> Response {
    match super::enable_tool(&state, &name).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => e.into_response(),
    }
}

async fn disable_handler(State(state): State<GatewayState>, Path(name): Path<String>) -> Response {
    match super::disable_tool(&state, &name).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(e) => e.into_response(),
    }
}

async fn metrics_handler(State(state): State<GatewayState>, prometheus_enabled: bool) -> Response {
    let tools = state.metrics.snapshot_all();
    if !prometheus_enabled {
        return Json(crate::metrics::MetricsSnapshot {
            timestamp: chrono::Utc::now().to_rfc3339(),
            tools,
        })
        .into_response();
    }

    let mut breakers = Vec::new();
    for name in state.breakers.tool_names() {
        if let Some(snapshot) = state.breakers.snapshot(&name).await {
            breakers.push((name, snapshot));
        }
    }
    let body = crate::metrics::render_prometheus(&tools, &breakers);
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4")],
        body,
    )
        .into_response()
}

struct EventsState {
    watch_rx: tokio::sync::watch::Receiver<Option<crate::health::SystemHealth>>,
    heartbeat: tokio::time::Interval,
}

/// `GET /events`: health status every 5s, pushed immediately on change via
/// the monitor's watch channel, heartbeat otherwise. Ends when the client
/// disconnects — axum drops the stream for us, nothing to do here.
async fn events_handler(
    State(state): State<GatewayState>,
) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    let initial = EventsState {
        watch_rx: state.health.subscribe(),
        heartbeat: tokio::time::interval(Duration::from_secs(5)),
    };

    let stream = futures::stream::unfold(initial, |mut st| async move {
        tokio::select! {
            _ = st.heartbeat.tick() => {}
            _ = st.watch_rx.changed() => {}
        }
        let health = st.watch_rx.borrow().clone();
        let payload = serde_json::json!({
            "type": "health",
            "data": health.map(|h| serde_json::json!({"status": h.status, "timestamp": h.timestamp})),
        });
        let event = Event::default().data(payload.to_string());
        Some((Ok(event), st))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

pub fn router(state: GatewayState, config: &HttpTransportConfig) -> Router {
    let prometheus_enabled = config.prometheus_enabled;

    let mut router = Router::new()
        .route("/health", get(health_handler))
        .route("/tools", get(list_tools_handler))
        .route("/tools/:name/execute", post(execute_handler))
        .route("/tools/:name/enable", post(enable_handler))
        .route("/tools/:name/disable", post(disable_handler))
        .route("/events", get(events_handler))
        .route(
            "/metrics",
            get(move |state: State<GatewayState>| metrics_handler(state, prometheus_enabled)),
        )
        .with_state(state);

    if config.enable_tracing {
        router = router.layer(TraceLayer::new_for_http());
    }

    if config.enable_cors {
        router = router.layer(CorsLayer::permissive());
    }

    if config.enable_rate_limiting {
        router = router.layer(axum::middleware::from_fn(rate_limit_middleware));
    }

    router.layer(axum::middleware::from_fn(security_headers_middleware))
}

pub async fn serve(state: GatewayState, config: HttpTransportConfig) -> std::io::Result<()> {
    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "gateway HTTP transport listening");
    let app = router(state, &config);
    axum::serve(listener, app.into_make_service_with_connect_info::<std::net::SocketAddr>())
        .await
}

// --- middleware, kept in the teacher's idiom (api::middleware) ---

use axum::extract::Request;
use axum::middleware::Next;
use dashmap::DashMap;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::OnceLock;

type IpRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;
static RATE_LIMITERS: OnceLock<DashMap<IpAddr, IpRateLimiter>> = OnceLock::new();

fn rate_limiter_for(ip: IpAddr) -> IpRateLimiter {
    let limiters = RATE_LIMITERS.get_or_init(DashMap::new);
    if let Some(existing) = limiters.get(&ip) {
        Arc::clone(&existing)
    } else {
        let quota = Quota::per_minute(NonZeroU32::new(100).unwrap());
        let limiter = Arc::new(RateLimiter::direct(quota));
        limiters.insert(ip, Arc::clone(&limiter));
        limiter
    }
}

fn client_ip(request: &Request) -> IpAddr {
    if let Some(forwarded) = request.headers().get("x-forwarded-for") {
        if let Ok(text) = forwarded.to_str() {
            if let Some(last) = text.split(',').next_back() {
                if let Ok(ip) = last.trim().parse::<IpAddr>() {
                    return ip;
                }
            }
        }
    }
    "127.0.0.1".parse().unwrap()
}

async fn rate_limit_middleware(request: Request, next: Next) -> Result<Response, StatusCode> {
    let ip = client_ip(&request);
    match rate_limiter_for(ip).check() {
        Ok(_) => Ok(next.run(request).await),
        Err(_) => {
            tracing::warn!(%ip, "rate limit exceeded");
            Err(StatusCode::TOO_MANY_REQUESTS)
        }
    }
}

async fn security_headers_middleware(request: Request, next: Next) -> Result<Response, StatusCode> {
    use axum::http::HeaderValue;
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "strict-transport-security",
        HeaderValue::from_static("max-age=63072000; includeSubDomains"),
    );
    headers.insert("x-content-type-options", HeaderValue::from_static("nosniff"));
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    Ok(response)
}

//! Token-gated HTTP control plane.
//!
//! `/health` is open; everything under `/api/` requires an `x-bridge-token`
//! header whose SHA-256 digest matches the configured admin hash in
//! constant time. With no hash configured the API is locked out entirely.

use amb_core::{Envelope, KeyDigest};
use axum::{
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, Query, State},
    http::{Request, Response, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};

use crate::daemon::BridgeCtx;
use crate::router::Delivery;

/// Build the control-plane router.
pub fn api_router(ctx: Arc<BridgeCtx>) -> Router {
    let api = Router::new()
        .route("/status", get(get_status))
        .route("/events", get(get_events))
        .route("/send", post(post_send))
        .layer(TokenLayer::new(ctx.config.admin_token_hash));

    Router::new()
        .route("/health", get(health))
        .nest("/api", api)
        .fallback(|| async { ApiError::NotFound("not_found") })
        .layer(DefaultBodyLimit::max(ctx.config.max_frame_bytes * 2))
        .with_state(ctx)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// HTTP-plane error: status code plus a machine-readable `error` body.
#[derive(Debug, Clone, Copy)]
pub enum ApiError {
    Unauthorized,
    BadRequest(&'static str),
    Forbidden(&'static str),
    NotFound(&'static str),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, code) = match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            ApiError::BadRequest(code) => (StatusCode::BAD_REQUEST, code),
            ApiError::Forbidden(code) => (StatusCode::FORBIDDEN, code),
            ApiError::NotFound(code) => (StatusCode::NOT_FOUND, code),
        };
        (status, Json(json!({"error": code}))).into_response()
    }
}

// ---------------------------------------------------------------------------
// TokenLayer
// ---------------------------------------------------------------------------

/// A [`tower::Layer`] enforcing the admin token on the `/api` subtree.
#[derive(Clone)]
pub struct TokenLayer {
    /// `None` = no admin hash configured; every request is rejected.
    admin_hash: Option<KeyDigest>,
}

impl TokenLayer {
    pub fn new(admin_hash: Option<KeyDigest>) -> Self {
        Self { admin_hash }
    }
}

impl<S> Layer<S> for TokenLayer {
    type Service = TokenMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TokenMiddleware {
            inner,
            admin_hash: self.admin_hash,
        }
    }
}

/// The middleware service produced by [`TokenLayer`].
#[derive(Clone)]
pub struct TokenMiddleware<S> {
    inner: S,
    admin_hash: Option<KeyDigest>,
}

impl<S> Service<Request<Body>> for TokenMiddleware<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let admin_hash = self.admin_hash;
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let provided = req
                .headers()
                .get("x-bridge-token")
                .and_then(|v| v.to_str().ok());

            let authorized = match (&admin_hash, provided) {
                (Some(expected), Some(token)) => expected.matches(token),
                _ => false,
            };

            if authorized {
                inner.call(req).await
            } else {
                Ok(ApiError::Unauthorized.into_response())
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn health() -> Json<Value> {
    Json(json!({"ok": true, "ts": Utc::now()}))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    ts: DateTime<Utc>,
    socket_path: String,
    active: HashMap<String, usize>,
    queued: HashMap<String, usize>,
    clients: Vec<StatusClient>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusClient {
    id: String,
    can_send_to: Vec<String>,
}

async fn get_status(State(ctx): State<Arc<BridgeCtx>>) -> Json<StatusResponse> {
    let mut clients: Vec<StatusClient> = ctx
        .registry
        .iter()
        .map(|c| StatusClient {
            id: c.id.clone(),
            can_send_to: c.can_send_to.clone(),
        })
        .collect();
    clients.sort_by(|a, b| a.id.cmp(&b.id));

    Json(StatusResponse {
        ts: Utc::now(),
        socket_path: ctx.config.socket_path.display().to_string(),
        active: ctx.router.counts(),
        queued: ctx.router.queue_depths(),
        clients,
    })
}

#[derive(Debug, Deserialize)]
struct EventsQuery {
    limit: Option<usize>,
}

async fn get_events(
    State(ctx): State<Arc<BridgeCtx>>,
    Query(query): Query<EventsQuery>,
) -> Json<Value> {
    let events = ctx.events.recent(query.limit.unwrap_or(100));
    Json(json!({"ts": Utc::now(), "events": events}))
}

fn default_send_type() -> String {
    "message".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendRequest {
    #[serde(default)]
    as_client: Option<String>,
    #[serde(default)]
    to: Option<String>,
    #[serde(rename = "type", default = "default_send_type")]
    kind: String,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    correlation_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct SendResponse {
    ok: bool,
    envelope: Envelope,
    routed: Delivery,
}

/// Operator-initiated send. Does not require a live connection for
/// `asClient`; the envelope routes exactly as a stream-originated one.
async fn post_send(
    State(ctx): State<Arc<BridgeCtx>>,
    body: Bytes,
) -> Result<Json<SendResponse>, ApiError> {
    let req: SendRequest =
        serde_json::from_slice(&body).map_err(|_| ApiError::BadRequest("invalid_json"))?;

    let as_client = match req.as_client {
        Some(c) if !c.is_empty() => c,
        _ => return Err(ApiError::BadRequest("missing_as_client")),
    };
    if !ctx.registry.contains(&as_client) {
        return Err(ApiError::NotFound("unknown_client"));
    }
    let to = match req.to {
        Some(t) if !t.is_empty() => t,
        _ => return Err(ApiError::BadRequest("missing_to")),
    };
    if !ctx.registry.contains(&to) {
        return Err(ApiError::NotFound("unknown_target"));
    }
    if !ctx.registry.route_allowed(&as_client, &to) {
        return Err(ApiError::Forbidden("route_not_allowed"));
    }

    let envelope = Envelope {
        id: req.id.unwrap_or_else(Envelope::generate_id),
        from: as_client,
        to,
        kind: req.kind,
        payload: req.payload,
        correlation_id: req.correlation_id,
        ts: Utc::now(),
    };
    let routed = ctx.router.route(envelope.clone());
    Ok(Json(SendResponse {
        ok: true,
        envelope,
        routed,
    }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

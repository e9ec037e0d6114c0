//! HTTP surface: Telegram webhook ingestion, Pub/Sub push delivery, health.
//!
//! The webhook does no business logic: it checks the shared secret, parses
//! the update, filters to the configured chat and enqueues. The push endpoint
//! is the consumer side of the managed queue; its status code is the ack.

use crate::consumer::Consumer;
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use mimic_channels::parse_update;
use mimic_core::{
    config::Config,
    error::MimicError,
    traits::{DeadLetterSink, EventQueue},
};
use mimic_queue::{constant_time_eq, decode_push, verify_push_token};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, info_span, warn, Instrument};

type ApiError = (StatusCode, Json<Value>);

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    queue: Arc<dyn EventQueue>,
    consumer: Arc<Consumer>,
    chat_id: i64,
    webhook_secret: String,
    push_token: String,
    enqueue_timeout: Duration,
    uptime: Instant,
}

impl ApiState {
    pub fn new(queue: Arc<dyn EventQueue>, consumer: Arc<Consumer>, config: &Config) -> Self {
        Self {
            queue,
            consumer,
            chat_id: config.chat.chat_id,
            webhook_secret: config.telegram.webhook_secret.clone(),
            push_token: config.queue.push_token.clone(),
            enqueue_timeout: Duration::from_secs(config.worker.io_timeout_secs),
            uptime: Instant::now(),
        }
    }
}

/// Secret headers accepted on the webhook, in order of preference.
const SECRET_HEADERS: &[&str] = &["x-secret-token", "x-telegram-bot-api-secret-token"];

/// Check the webhook secret. Returns `None` if authorized, `Some(response)` if rejected.
fn check_secret(headers: &HeaderMap, expected: &str) -> Option<ApiError> {
    let presented = SECRET_HEADERS
        .iter()
        .find_map(|name| headers.get(*name))
        .and_then(|v| v.to_str().ok());

    match presented {
        Some(secret) if constant_time_eq(secret, expected) => None,
        _ => {
            warn!(target: "security", "webhook.unauthorized");
            Some((
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "invalid secret token"})),
            ))
        }
    }
}

/// Trace id from `X-Cloud-Trace-Context: TRACE_ID/SPAN_ID;o=1`.
fn trace_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-cloud-trace-context")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split('/').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

fn dropped(reason: &str) -> Json<Value> {
    Json(json!({"status": "dropped", "reason": reason}))
}

/// `GET /health`
async fn health(State(state): State<ApiState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "uptime_secs": state.uptime.elapsed().as_secs(),
        "queue": state.queue.name(),
    }))
}

/// `POST /webhook`: validate, parse, filter, enqueue.
async fn webhook(
    headers: HeaderMap,
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let span = info_span!("ingest", trace_id = trace_id(&headers).unwrap_or_default());
    async move {
        if let Some(err) = check_secret(&headers, &state.webhook_secret) {
            return Err(err);
        }

        let event = match parse_update(&body) {
            Ok(event) => event,
            Err(e) => {
                info!(error = %e, "update.dropped");
                return Ok(dropped("malformed"));
            }
        };

        if event.chat_id != state.chat_id {
            info!(
                event_id = event.event_id,
                chat_id = event.chat_id,
                "update.dropped: foreign chat"
            );
            return Ok(dropped("foreign_chat"));
        }

        let enqueued = tokio::time::timeout(state.enqueue_timeout, state.queue.enqueue(&event))
            .await
            .unwrap_or_else(|_| Err(MimicError::Timeout("enqueue timed out".into())));
        match enqueued {
            Ok(()) => {
                info!(
                    event_id = event.event_id,
                    kind = event.kind.as_str(),
                    preview = %event.preview(),
                    "update.queued"
                );
                Ok(Json(json!({"status": "queued", "event_id": event.event_id})))
            }
            Err(e) => {
                error!(event_id = event.event_id, error = %e, "update.enqueue_failed");
                Err((
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(json!({"error": "enqueue failed"})),
                ))
            }
        }
    }
    .instrument(span)
    .await
}

/// `POST /queue/push`: one managed-queue delivery.
///
/// `200` acknowledges (processed, duplicate, or dead-lettered); `500` makes
/// the substrate redeliver.
async fn queue_push(
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<ApiState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let authorization = headers.get("authorization").and_then(|v| v.to_str().ok());
    if let Err(e) = verify_push_token(
        authorization,
        params.get("token").map(String::as_str),
        &state.push_token,
    ) {
        warn!(target: "security", error = %e, "pubsub.auth.rejected");
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(json!({"error": "invalid push token"})),
        ));
    }

    let (message_id, decoded) = match decode_push(&body) {
        Ok((envelope, decoded)) => (envelope.message.message_id, decoded),
        Err(e) => (None, Err(e)),
    };
    info!(message_id = message_id.as_deref().unwrap_or("-"), "pubsub.message.received");

    let event = match decoded {
        Ok(event) => event,
        Err(e) => {
            error!(error = %e, "pubsub.message.undecodable");
            let payload = String::from_utf8_lossy(&body);
            if let Err(dl) = state
                .consumer
                .store()
                .dead_letter(None, &payload, &e.to_string())
                .await
            {
                error!("dead letter write failed: {dl}");
                return Err((
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({"error": "dead letter write failed"})),
                ));
            }
            return Ok(Json(json!({"status": "dead_lettered"})));
        }
    };

    if event.chat_id != state.chat_id {
        info!(
            event_id = event.event_id,
            chat_id = event.chat_id,
            "pubsub.message.dropped: foreign chat"
        );
        return Ok(dropped("foreign_chat"));
    }

    match state.consumer.process(&event).await {
        Ok(outcome) => {
            info!(
                event_id = event.event_id,
                outcome = outcome.as_str(),
                "pubsub.message.processed"
            );
            Ok(Json(json!({"status": outcome.as_str(), "event_id": event.event_id})))
        }
        Err(e) => {
            warn!(event_id = event.event_id, error = %e, "pubsub.message.failed");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": "processing failed, retry"})),
            ))
        }
    }
}

/// Build the axum router with shared state.
pub fn build_router(state: ApiState, body_limit: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhook", post(webhook))
        .route("/queue/push", post(queue_push))
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

/// Bind and serve until the task is aborted.
pub async fn serve(state: ApiState, host: &str, port: u16, body_limit: usize) {
    let app = build_router(state, body_limit);
    let addr = format!("{host}:{port}");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("API server failed to bind to {addr}: {e}");
            return;
        }
    };

    info!("API server listening on {addr}");

    if let Err(e) = axum::serve(listener, app).await {
        error!("API server error: {e}");
    }
}

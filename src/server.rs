//! Inbound webhook endpoint and operational routes, built on axum.
//!
//! The webhook always answers 200 once the signature checks out and the body
//! decodes, including for skipped and dropped events, so Intercom does not
//! redeliver payloads the relay has already decided about.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::db::{DedupStore, StoreError};
use crate::model::DedupRecord;
use crate::normalize::{normalize, Normalized};
use crate::queue::{DeliveryQueue, EnqueueOutcome};
use crate::signature::{verify_signature, SIGNATURE_HEADER};

const DEFAULT_RECENT_LIMIT: u32 = 20;
const MAX_RECENT_LIMIT: u32 = 500;

#[derive(Clone)]
pub struct AppState {
    queue: DeliveryQueue,
    store: Arc<dyn DedupStore>,
    webhook_secret: Option<Arc<str>>,
}

impl AppState {
    pub fn new(
        queue: DeliveryQueue,
        store: Arc<dyn DedupStore>,
        webhook_secret: Option<String>,
    ) -> Self {
        Self {
            queue,
            store,
            webhook_secret: webhook_secret.map(Arc::from),
        }
    }
}

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("missing signature header")]
    MissingSignature,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid JSON body: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebhookError::MissingSignature | WebhookError::InvalidSignature => {
                StatusCode::UNAUTHORIZED
            }
            WebhookError::InvalidJson(_) => StatusCode::BAD_REQUEST,
            WebhookError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhooks/intercom", post(intercom_webhook))
        .route("/deliveries/recent", get(recent_deliveries))
        .with_state(state)
}

/// Serve until `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "webhook server listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[instrument(skip_all, fields(request_id = %Uuid::new_v4()))]
async fn intercom_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, WebhookError> {
    if let Some(secret) = state.webhook_secret.as_deref() {
        let header = headers
            .get(SIGNATURE_HEADER)
            .and_then(|h| h.to_str().ok())
            .ok_or(WebhookError::MissingSignature)?;
        if !verify_signature(&body, header, secret.as_bytes()) {
            warn!("rejecting webhook with bad signature");
            return Err(WebhookError::InvalidSignature);
        }
    }

    let raw: Value = serde_json::from_slice(&body)?;

    let status = match normalize(&raw) {
        Ok(Normalized::Message(message)) => match state.queue.enqueue(message).await {
            EnqueueOutcome::Queued => "queued",
            EnqueueOutcome::AlreadyDelivered | EnqueueOutcome::AlreadyQueued => "duplicate",
            EnqueueOutcome::Suppressed => "suppressed",
        },
        Ok(Normalized::Skip(reason)) => {
            debug!(reason, "webhook skipped");
            "skipped"
        }
        Err(err) => {
            let topic = raw.get("topic").and_then(|t| t.as_str());
            warn!(?err, topic, "dropping malformed webhook");
            "dropped"
        }
    };

    Ok(Json(json!({ "status": status })))
}

#[derive(Debug, Deserialize)]
struct RecentParams {
    limit: Option<u32>,
}

async fn recent_deliveries(
    State(state): State<AppState>,
    Query(params): Query<RecentParams>,
) -> Result<Json<Vec<DedupRecord>>, WebhookError> {
    let limit = params
        .limit
        .unwrap_or(DEFAULT_RECENT_LIMIT)
        .clamp(1, MAX_RECENT_LIMIT);
    let records = state.store.recent_records(limit).await?;
    Ok(Json(records))
}

//! HTTP surface: the public webhook, the queue-facing worker endpoint, and
//! health.
//!
//! The worker endpoint sits behind a bearer credential compared in constant
//! time. Its status codes drive the queue's redelivery: 2xx consumes the
//! delivery, 5xx retries it, and an authorization rejection is a 403 so a
//! forged job is never acknowledged as done.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use bytes::Bytes;
use secrecy::ExposeSecret;
use subtle::ConstantTimeEq;
use tokio::time::MissedTickBehavior;
use tower::ServiceBuilder;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

use crate::channels::webhook;
use crate::config::Config;
use crate::conversation::ConversationFlow;
use crate::db::Store;
use crate::error::{Error, QueueError};
use crate::pipeline::Orchestrator;
use crate::queue::{DELIVERY_ATTEMPT_HEADER, GenerationJob};

/// How often the background maintenance sweep runs.
const RECLAIM_INTERVAL: Duration = Duration::from_secs(300);
/// Minutes in progress before a step counts as abandoned.
const RECLAIM_STALENESS_MINUTES: i32 = 15;
/// Days of webhook delivery journal kept for dedup.
const DELIVERY_RETENTION_DAYS: i32 = 7;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub flow: Arc<ConversationFlow>,
    pub orchestrator: Arc<Orchestrator<Store>>,
    pub config: Arc<Config>,
}

pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .route("/webhook", post(webhook::receive))
        .route("/healthz", get(healthz));
    let worker = Router::new()
        .route("/worker/generate", post(worker_generate))
        .route_layer(middleware::from_fn_with_state(state.clone(), worker_auth));
    Router::new()
        .merge(public)
        .merge(worker)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CatchPanicLayer::new()),
        )
        .with_state(state)
}

/// Periodic maintenance: re-arms steps abandoned by crashed workers, so the
/// queue's next redelivery can claim them, and prunes old delivery-journal
/// rows.
pub fn spawn_maintenance(store: Store) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(RECLAIM_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match store.reclaim_stale_steps(RECLAIM_STALENESS_MINUTES).await {
                Ok(0) => {}
                Ok(count) => tracing::warn!(count, "re-armed stale generation steps"),
                Err(e) => tracing::error!(error = %e, "stale step reclaim failed"),
            }
            if let Err(e) = store.cleanup_old_deliveries(DELIVERY_RETENTION_DAYS).await {
                tracing::error!(error = %e, "delivery journal cleanup failed");
            }
        }
    });
}

async fn healthz(State(state): State<AppState>) -> Response {
    match state.store.ping().await {
        Ok(()) => (StatusCode::OK, "ok").into_response(),
        Err(e) => {
            tracing::error!(error = %e, "health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "database unreachable").into_response()
        }
    }
}

/// Bearer credential check for queue deliveries, constant-time comparison.
async fn worker_auth(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    if let Some(header) = headers.get("authorization")
        && let Ok(value) = header.to_str()
        && let Some(token) = value.strip_prefix("Bearer ")
        && bool::from(
            token
                .as_bytes()
                .ct_eq(state.config.queue.worker_token.expose_secret().as_bytes()),
        )
    {
        return next.run(request).await;
    }
    tracing::warn!("worker request rejected, bad credential");
    (StatusCode::UNAUTHORIZED, "invalid or missing worker token").into_response()
}

fn delivery_attempt(headers: &HeaderMap) -> u32 {
    headers
        .get(DELIVERY_ATTEMPT_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(0)
}

async fn worker_generate(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let job: GenerationJob = match serde_json::from_slice(&body) {
        Ok(job) => job,
        Err(e) => {
            let err = QueueError::MalformedJob {
                reason: e.to_string(),
            };
            // A malformed body never becomes parseable; acknowledge so the
            // queue stops redelivering it.
            tracing::error!(error = %err, "unparseable job body, dropping delivery");
            return (StatusCode::OK, "dropped").into_response();
        }
    };
    let attempt = delivery_attempt(&headers);

    match state.orchestrator.run(&job, attempt).await {
        Ok(disposition) if disposition.consumes_delivery() => {
            (StatusCode::OK, "ok").into_response()
        }
        Ok(_) => (StatusCode::SERVICE_UNAVAILABLE, "stage busy, retry later").into_response(),
        Err(Error::Auth(e)) => {
            tracing::warn!(user = %job.user_id, stage = %job.stage, error = %e, "worker job rejected");
            (StatusCode::FORBIDDEN, "job identity rejected").into_response()
        }
        Err(e) => {
            tracing::error!(user = %job.user_id, stage = %job.stage, error = %e, "stage failed, delivery will retry");
            (StatusCode::INTERNAL_SERVER_ERROR, "stage failed").into_response()
        }
    }
}

/// Resolves on SIGINT or SIGTERM for graceful shutdown.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "ctrl-c handler failed");
        }
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!(error = %e, "sigterm handler failed"),
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
    tracing::info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn attempt_header_parses_with_fallback() {
        let mut headers = HeaderMap::new();
        assert_eq!(delivery_attempt(&headers), 0);

        headers.insert(DELIVERY_ATTEMPT_HEADER, HeaderValue::from_static("3"));
        assert_eq!(delivery_attempt(&headers), 3);

        headers.insert(DELIVERY_ATTEMPT_HEADER, HeaderValue::from_static("junk"));
        assert_eq!(delivery_attempt(&headers), 0);
    }
}

//! Inbound webhook endpoint.
//!
//! The handler does three things synchronously: verify the body signature,
//! parse the envelope, and acknowledge. Event processing runs in spawned
//! tasks so the channel's delivery timer never waits on the database or the
//! AI backends. A bad signature is always a 400, never a silent 200.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use secrecy::ExposeSecret;

use crate::conversation::Event;
use crate::server::AppState;

use super::{
    ChannelEvent, DELIVERY_CHANNEL, EventEnvelope, InboundMessage, SIGNATURE_HEADER,
    verify_signature,
};

pub async fn receive(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(signature) = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
    else {
        tracing::warn!("webhook rejected, signature header missing");
        return StatusCode::BAD_REQUEST.into_response();
    };
    if !verify_signature(
        state.config.channel.channel_secret.expose_secret(),
        signature,
        &body,
    ) {
        tracing::warn!("webhook rejected, signature mismatch");
        return StatusCode::BAD_REQUEST.into_response();
    }

    let envelope: EventEnvelope = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::warn!(error = %e, "webhook rejected, malformed envelope");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    // Acknowledge now; the channel redelivers on slow responses.
    for event in envelope.events {
        let state = state.clone();
        tokio::spawn(async move {
            process_event(state, event).await;
        });
    }
    (StatusCode::OK, "ok").into_response()
}

/// Map one channel event onto the dialogue, behind the delivery journal.
async fn process_event(state: AppState, event: ChannelEvent) {
    let (event_id, user_id, mapped) = match event {
        ChannelEvent::Follow { event_id, source } => (event_id, source.user_id, Event::Follow),
        ChannelEvent::Message {
            event_id,
            source,
            message,
        } => match message {
            InboundMessage::Text { text } => (event_id, source.user_id, Event::Text { text }),
            InboundMessage::Unsupported => {
                tracing::debug!(event = %event_id, "ignoring non-text message");
                return;
            }
        },
        ChannelEvent::Postback {
            event_id,
            source,
            postback,
        } => (
            event_id,
            source.user_id,
            Event::Postback {
                data: postback.data,
            },
        ),
        ChannelEvent::Unsupported => {
            tracing::debug!("ignoring unsupported event kind");
            return;
        }
    };

    match state.store.record_delivery(DELIVERY_CHANNEL, &event_id).await {
        Ok(true) => {}
        Ok(false) => {
            tracing::info!(event = %event_id, "duplicate delivery, skipping");
            return;
        }
        Err(e) => {
            tracing::error!(event = %event_id, error = %e, "delivery journal write failed");
            return;
        }
    }

    if let Err(e) = state.flow.handle_event(&user_id, mapped).await {
        tracing::error!(event = %event_id, error = %e, "event handling failed");
    }
}

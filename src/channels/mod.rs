//! Messaging-channel boundary: inbound webhook envelope, signature
//! verification, and outbound push.

pub mod notify;
pub mod webhook;

pub use notify::{Notifier, PushClient};

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Journal name for inbound-event dedup rows.
pub const DELIVERY_CHANNEL: &str = "messaging";

/// Signature header on inbound webhook requests:
/// base64(HMAC-SHA256(channel_secret, raw body)).
pub const SIGNATURE_HEADER: &str = "x-channel-signature";

/// Verify a webhook body signature.
///
/// Returns `false` on any defect (bad base64, wrong length, mismatch); the
/// comparison itself is constant-time.
pub fn verify_signature(channel_secret: &str, signature_b64: &str, body: &[u8]) -> bool {
    let Ok(expected) =
        base64::Engine::decode(&base64::engine::general_purpose::STANDARD, signature_b64)
    else {
        return false;
    };
    // SHA-256 MACs are 32 bytes; reject wrong lengths early.
    if expected.len() != 32 {
        return false;
    }

    let Ok(mut mac) = HmacSha256::new_from_slice(channel_secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    let computed = mac.finalize().into_bytes();

    computed.as_slice().ct_eq(expected.as_slice()).into()
}

/// Top-level webhook payload: a batch of events.
#[derive(Debug, Deserialize)]
pub struct EventEnvelope {
    pub events: Vec<ChannelEvent>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChannelEvent {
    Follow {
        event_id: String,
        source: EventSource,
    },
    Message {
        event_id: String,
        source: EventSource,
        message: InboundMessage,
    },
    Postback {
        event_id: String,
        source: EventSource,
        postback: PostbackPayload,
    },
    /// Event kinds this service does not handle (unfollow, join, sticker...).
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Deserialize)]
pub struct EventSource {
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    Text { text: String },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Deserialize)]
pub struct PostbackPayload {
    pub data: String,
}

/// Outbound message, channel-agnostic. The push client maps these onto the
/// channel API's message objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    Text {
        text: String,
    },
    Buttons {
        text: String,
        actions: Vec<MessageAction>,
    },
}

/// One postback button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageAction {
    pub label: String,
    pub data: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            mac.finalize().into_bytes(),
        )
    }

    #[test]
    fn valid_signature_verifies() {
        let body = br#"{"events":[]}"#;
        let sig = sign("secret", body);
        assert!(verify_signature("secret", &sig, body));
    }

    #[test]
    fn tampered_body_fails() {
        let sig = sign("secret", br#"{"events":[]}"#);
        assert!(!verify_signature("secret", &sig, br#"{"events":[{}]}"#));
    }

    #[test]
    fn wrong_secret_fails() {
        let body = br#"{"events":[]}"#;
        let sig = sign("secret", body);
        assert!(!verify_signature("other-secret", &sig, body));
    }

    #[test]
    fn malformed_signature_fails_closed() {
        let body = b"{}";
        assert!(!verify_signature("secret", "not base64!!!", body));
        assert!(!verify_signature("secret", "", body));
        // Valid base64, wrong length.
        assert!(!verify_signature("secret", "c2hvcnQ=", body));
    }

    #[test]
    fn envelope_parses_known_and_unknown_events() {
        let raw = r#"{
            "events": [
                {"type":"message","event_id":"ev-1",
                 "source":{"user_id":"U-1"},
                 "message":{"type":"text","text":"こんにちは"}},
                {"type":"postback","event_id":"ev-2",
                 "source":{"user_id":"U-1"},
                 "postback":{"data":"action=consent&agree=true"}},
                {"type":"follow","event_id":"ev-3","source":{"user_id":"U-2"}},
                {"type":"unfollow","event_id":"ev-4","source":{"user_id":"U-2"}}
            ]
        }"#;
        let envelope: EventEnvelope = serde_json::from_str(raw).unwrap();
        assert_eq!(envelope.events.len(), 4);
        assert!(matches!(envelope.events[0], ChannelEvent::Message { .. }));
        assert!(matches!(envelope.events[1], ChannelEvent::Postback { .. }));
        assert!(matches!(envelope.events[2], ChannelEvent::Follow { .. }));
        assert!(matches!(envelope.events[3], ChannelEvent::Unsupported));
    }

    #[test]
    fn non_text_message_is_tolerated() {
        let raw = r#"{"type":"message","event_id":"ev-9",
                      "source":{"user_id":"U-1"},
                      "message":{"type":"sticker"}}"#;
        let event: ChannelEvent = serde_json::from_str(raw).unwrap();
        match event {
            ChannelEvent::Message { message, .. } => {
                assert!(matches!(message, InboundMessage::Unsupported));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}

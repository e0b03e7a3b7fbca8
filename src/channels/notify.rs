//! Outbound push to the messaging channel.
//!
//! Pushes are fire-and-forget for the pipeline: a failed delivery is logged
//! and never changes persisted pipeline state.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::Serialize;

use crate::config::ChannelConfig;
use crate::error::ChannelError;
use crate::util::truncate_for_log;

use super::{MessageAction, OutboundMessage};

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn push(
        &self,
        channel_user_id: &str,
        messages: Vec<OutboundMessage>,
    ) -> Result<(), ChannelError>;
}

#[derive(Serialize)]
struct PushRequest<'a> {
    to: &'a str,
    messages: Vec<WireMessage>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireMessage {
    Text {
        text: String,
    },
    Buttons {
        text: String,
        actions: Vec<WireAction>,
    },
}

#[derive(Serialize)]
struct WireAction {
    #[serde(rename = "type")]
    kind: &'static str,
    label: String,
    data: String,
}

impl From<MessageAction> for WireAction {
    fn from(a: MessageAction) -> Self {
        Self {
            kind: "postback",
            label: a.label,
            data: a.data,
        }
    }
}

impl From<OutboundMessage> for WireMessage {
    fn from(m: OutboundMessage) -> Self {
        match m {
            OutboundMessage::Text { text } => WireMessage::Text { text },
            OutboundMessage::Buttons { text, actions } => WireMessage::Buttons {
                text,
                actions: actions.into_iter().map(WireAction::from).collect(),
            },
        }
    }
}

pub struct PushClient {
    client: Client,
    config: ChannelConfig,
}

impl PushClient {
    pub fn new(config: ChannelConfig) -> Result<Self, ChannelError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| ChannelError::PushFailed {
                reason: format!("failed to build http client: {e}"),
            })?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl Notifier for PushClient {
    async fn push(
        &self,
        channel_user_id: &str,
        messages: Vec<OutboundMessage>,
    ) -> Result<(), ChannelError> {
        if messages.is_empty() {
            return Ok(());
        }
        let url = self
            .config
            .api_base
            .join("push")
            .map_err(|e| ChannelError::PushFailed {
                reason: format!("bad push url: {e}"),
            })?;
        let body = PushRequest {
            to: channel_user_id,
            messages: messages.into_iter().map(WireMessage::from).collect(),
        };

        let response = self
            .client
            .post(url)
            .bearer_auth(self.config.access_token.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| ChannelError::PushFailed {
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ChannelError::PushFailed {
                reason: format!("HTTP {status}: {}", truncate_for_log(&text, 200)),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn messages_serialize_to_channel_wire_format() {
        let wire: Vec<WireMessage> = vec![
            OutboundMessage::Text {
                text: "こんにちは".to_string(),
            }
            .into(),
            OutboundMessage::Buttons {
                text: "よろしいですか？".to_string(),
                actions: vec![MessageAction {
                    label: "はい".to_string(),
                    data: "action=consent&agree=true".to_string(),
                }],
            }
            .into(),
        ];
        let json = serde_json::to_value(&wire).unwrap();
        assert_eq!(json[0]["type"], "text");
        assert_eq!(json[0]["text"], "こんにちは");
        assert_eq!(json[1]["type"], "buttons");
        assert_eq!(json[1]["actions"][0]["type"], "postback");
        assert_eq!(json[1]["actions"][0]["label"], "はい");
    }
}

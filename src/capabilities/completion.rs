//! Chat-completions client for any OpenAI-compatible endpoint.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use crate::config::CompletionConfig;
use crate::error::CapabilityError;
use crate::util::truncate_for_log;

use super::{ChatMessage, CompletionProvider};

const SERVICE: &str = "completion";

pub struct CompletionClient {
    client: Client,
    config: CompletionConfig,
}

impl CompletionClient {
    pub fn new(config: CompletionConfig) -> Result<Self, CapabilityError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| CapabilityError::RequestFailed {
                service: SERVICE,
                reason: format!("failed to build http client: {e}"),
            })?;
        Ok(Self { client, config })
    }

    /// Endpoint URL under `/v1/`, tolerating a base that already carries the
    /// `/v1` suffix.
    fn api_url(&self, path: &str) -> String {
        let base = self.config.base_url.trim_end_matches('/');
        let base = base.strip_suffix("/v1").unwrap_or(base);
        format!("{}/v1/{}", base, path.trim_start_matches('/'))
    }

    fn add_auth_header(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.config.api_key.as_ref() {
            Some(key) => request.bearer_auth(key.expose_secret()),
            None => request,
        }
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

impl From<ChatMessage> for WireMessage {
    fn from(m: ChatMessage) -> Self {
        Self {
            role: m.role.as_str(),
            content: m.content,
        }
    }
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[async_trait]
impl CompletionProvider for CompletionClient {
    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String, CapabilityError> {
        let url = self.api_url("chat/completions");
        let body = ChatCompletionRequest {
            model: &self.config.model,
            messages: messages.into_iter().map(WireMessage::from).collect(),
        };

        tracing::debug!(%url, model = %self.config.model, "sending completion request");

        let request = self.client.post(&url).json(&body);
        let response = self.add_auth_header(request).send().await.map_err(|e| {
            CapabilityError::RequestFailed {
                service: SERVICE,
                reason: e.to_string(),
            }
        })?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| CapabilityError::RequestFailed {
                service: SERVICE,
                reason: format!("failed to read response body: {e}"),
            })?;

        if !status.is_success() {
            if status.as_u16() == 401 {
                return Err(CapabilityError::AuthFailed { service: SERVICE });
            }
            if status.as_u16() == 429 {
                return Err(CapabilityError::RateLimited { service: SERVICE });
            }
            return Err(CapabilityError::RequestFailed {
                service: SERVICE,
                reason: format!("HTTP {status}: {}", truncate_for_log(&text, 200)),
            });
        }

        let parsed: ChatCompletionResponse =
            serde_json::from_str(&text).map_err(|e| CapabilityError::InvalidResponse {
                service: SERVICE,
                reason: format!("JSON parse error: {e}. Raw: {}", truncate_for_log(&text, 200)),
            })?;

        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or(CapabilityError::InvalidResponse {
                service: SERVICE,
                reason: "no choices in response".to_string(),
            })?;

        Ok(choice.message.content.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn client(base_url: &str) -> CompletionClient {
        CompletionClient::new(CompletionConfig {
            base_url: base_url.to_string(),
            api_key: None,
            model: "test-model".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn api_url_appends_v1_once() {
        assert_eq!(
            client("http://localhost:8081").api_url("chat/completions"),
            "http://localhost:8081/v1/chat/completions"
        );
        assert_eq!(
            client("http://localhost:8081/v1/").api_url("chat/completions"),
            "http://localhost:8081/v1/chat/completions"
        );
    }

    #[test]
    fn response_parse_takes_first_choice() {
        let raw = r#"{"choices":[{"message":{"role":"assistant","content":"こんにちは"}}],"usage":{"prompt_tokens":3,"completion_tokens":2}}"#;
        let parsed: ChatCompletionResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(
            parsed.choices[0].message.content.as_deref(),
            Some("こんにちは")
        );
    }
}

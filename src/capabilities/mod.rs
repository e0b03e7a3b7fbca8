//! External AI capabilities.
//!
//! Two narrow seams: text completion against any OpenAI-compatible
//! chat-completions endpoint, and procedure-knowledge retrieval against the
//! internal search service. The pipeline and chat layers depend on the
//! traits, so tests run against scripted fakes and the binary wires in the
//! HTTP clients.

mod completion;
mod retrieval;

pub use completion::CompletionClient;
pub use retrieval::RetrievalClient;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::CapabilityError;
use crate::model::MessageRole;

/// One turn of completion input.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Run the conversation through the model and return the reply text.
    async fn complete(&self, messages: Vec<ChatMessage>) -> Result<String, CapabilityError>;
}

/// One knowledge-base passage returned by retrieval.
#[derive(Debug, Clone, Deserialize)]
pub struct RetrievalHit {
    pub source: String,
    pub text: String,
    #[serde(default)]
    pub url: Option<String>,
}

#[async_trait]
pub trait RetrievalProvider: Send + Sync {
    /// Top passages for a query, best first.
    async fn search(&self, query: &str) -> Result<Vec<RetrievalHit>, CapabilityError>;
}

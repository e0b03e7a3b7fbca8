//! Client for the procedure-knowledge search service.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use crate::config::RetrievalConfig;
use crate::error::CapabilityError;
use crate::util::truncate_for_log;

use super::{RetrievalHit, RetrievalProvider};

const SERVICE: &str = "retrieval";

pub struct RetrievalClient {
    client: Client,
    config: RetrievalConfig,
}

impl RetrievalClient {
    pub fn new(config: RetrievalConfig) -> Result<Self, CapabilityError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| CapabilityError::RequestFailed {
                service: SERVICE,
                reason: format!("failed to build http client: {e}"),
            })?;
        Ok(Self { client, config })
    }
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    top_k: usize,
}

#[derive(Deserialize)]
struct SearchResponse {
    results: Vec<RetrievalHit>,
}

#[async_trait]
impl RetrievalProvider for RetrievalClient {
    async fn search(&self, query: &str) -> Result<Vec<RetrievalHit>, CapabilityError> {
        let url = self
            .config
            .api_base
            .join("search")
            .map_err(|e| CapabilityError::RequestFailed {
                service: SERVICE,
                reason: format!("bad search url: {e}"),
            })?;

        tracing::debug!(%url, top_k = self.config.top_k, "sending retrieval query");

        let mut request = self.client.post(url).json(&SearchRequest {
            query,
            top_k: self.config.top_k,
        });
        if let Some(key) = self.config.api_key.as_ref() {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request
            .send()
            .await
            .map_err(|e| CapabilityError::RequestFailed {
                service: SERVICE,
                reason: e.to_string(),
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

        let parsed: SearchResponse =
            serde_json::from_str(&text).map_err(|e| CapabilityError::InvalidResponse {
                service: SERVICE,
                reason: format!("JSON parse error: {e}. Raw: {}", truncate_for_log(&text, 200)),
            })?;
        Ok(parsed.results)
    }
}

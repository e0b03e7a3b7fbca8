//! HTTP task-queue transport.
//!
//! Generation stages never run inline with webhook handling. Enqueueing
//! registers a delivery with the queue service: the queue POSTs the job
//! payload to our own `/worker/generate` endpoint with the worker bearer
//! token, retries on non-2xx responses, and counts attempts in a request
//! header. Everything that makes this safe (claims, ownership, dedup) lives
//! on the receiving side; this module is deliberately dumb transport.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::error::QueueError;
use crate::model::Stage;

/// Header carrying the 1-based delivery attempt count.
pub const DELIVERY_ATTEMPT_HEADER: &str = "x-queue-delivery-attempt";

/// Payload of one queued stage run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationJob {
    /// Internal id the job claims to act for. Verified on delivery.
    pub user_id: Uuid,
    /// Channel identity the job claims to act for. Verified on delivery.
    pub channel_user_id: String,
    pub stage: Stage,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: &GenerationJob) -> Result<(), QueueError>;
}

#[derive(Serialize)]
struct CreateDelivery<'a> {
    url: String,
    headers: HashMap<&'static str, String>,
    body: &'a GenerationJob,
    max_attempts: u32,
}

pub struct HttpTaskQueue {
    client: Client,
    config: QueueConfig,
}

impl HttpTaskQueue {
    pub fn new(config: QueueConfig) -> Result<Self, QueueError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| QueueError::EnqueueFailed {
                stage: "-".to_string(),
                user_id: "-".to_string(),
                reason: format!("failed to build http client: {e}"),
            })?;
        Ok(Self { client, config })
    }

    fn enqueue_error(&self, job: &GenerationJob, reason: String) -> QueueError {
        QueueError::EnqueueFailed {
            stage: job.stage.to_string(),
            user_id: job.user_id.to_string(),
            reason,
        }
    }
}

#[async_trait]
impl JobQueue for HttpTaskQueue {
    async fn enqueue(&self, job: &GenerationJob) -> Result<(), QueueError> {
        let target = self
            .config
            .worker_base
            .join("worker/generate")
            .map_err(|e| self.enqueue_error(job, format!("bad worker url: {e}")))?;
        let create = self
            .config
            .api_base
            .join("tasks")
            .map_err(|e| self.enqueue_error(job, format!("bad queue url: {e}")))?;

        let mut headers = HashMap::new();
        headers.insert(
            "authorization",
            format!("Bearer {}", self.config.worker_token.expose_secret()),
        );
        headers.insert("content-type", "application/json".to_string());

        let body = CreateDelivery {
            url: target.to_string(),
            headers,
            body: job,
            max_attempts: self.config.max_attempts,
        };

        tracing::info!(user = %job.user_id, stage = %job.stage, "enqueueing generation stage");

        let response = self
            .client
            .post(create)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.enqueue_error(job, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(self.enqueue_error(
                job,
                format!(
                    "HTTP {status}: {}",
                    crate::util::truncate_for_log(&text, 200)
                ),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn job_payload_round_trips() {
        let job = GenerationJob {
            user_id: Uuid::new_v4(),
            channel_user_id: "U-123".to_string(),
            stage: Stage::Personalized,
        };
        let json = serde_json::to_string(&job).unwrap();
        assert!(json.contains("\"personalized\""));
        let back: GenerationJob = serde_json::from_str(&json).unwrap();
        assert_eq!(back.user_id, job.user_id);
        assert_eq!(back.stage, Stage::Personalized);
    }
}

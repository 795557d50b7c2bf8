//! Webhook notification on job success.

use std::time::Duration;

use tracing::{info, warn};

use montage_models::WebhookPayload;

use crate::error::{WorkerError, WorkerResult};
use crate::metrics;

/// Result of one delivery attempt. Never an error: the job outcome does not
/// depend on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// No endpoint configured
    Skipped,
    /// Endpoint answered 2xx
    Delivered(u16),
    /// Endpoint answered with another status
    Rejected(u16),
    /// Timeout or transport error
    Failed(String),
}

impl NotifyOutcome {
    fn label(&self) -> &'static str {
        match self {
            NotifyOutcome::Skipped => "skipped",
            NotifyOutcome::Delivered(_) => "delivered",
            NotifyOutcome::Rejected(_) => "rejected",
            NotifyOutcome::Failed(_) => "failed",
        }
    }
}

/// Sends a single POST per successful job. There is no retry.
#[derive(Debug, Clone)]
pub struct NotificationDispatcher {
    client: reqwest::Client,
    endpoint: Option<String>,
}

impl NotificationDispatcher {
    pub fn new(endpoint: Option<String>, timeout: Duration) -> WorkerResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WorkerError::internal(format!("failed to build webhook client: {}", e)))?;
        Ok(Self { client, endpoint })
    }

    pub fn is_configured(&self) -> bool {
        self.endpoint.is_some()
    }

    pub async fn notify(&self, payload: &WebhookPayload) -> NotifyOutcome {
        let Some(endpoint) = self.endpoint.as_deref() else {
            return NotifyOutcome::Skipped;
        };

        let outcome = match self.client.post(endpoint).json(payload).send().await {
            Ok(resp) if resp.status().is_success() => {
                info!(job_id = %payload.task_id, "Webhook delivered");
                NotifyOutcome::Delivered(resp.status().as_u16())
            }
            Ok(resp) => {
                warn!(
                    job_id = %payload.task_id,
                    status = resp.status().as_u16(),
                    "Webhook rejected"
                );
                NotifyOutcome::Rejected(resp.status().as_u16())
            }
            Err(e) => {
                warn!(job_id = %payload.task_id, "Webhook delivery failed: {}", e);
                NotifyOutcome::Failed(e.to_string())
            }
        };

        metrics::record_webhook(outcome.label());
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use montage_models::{JobId, SuccessStatus};
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn payload() -> WebhookPayload {
        let now = Utc::now();
        WebhookPayload::from_success(
            &JobId::new(),
            &SuccessStatus {
                message: "Processing complete".into(),
                output_file: "job.mp4".into(),
                file_size: 42,
                expires_at: now,
                completed_at: now,
            },
        )
    }

    #[tokio::test]
    async fn test_skipped_without_endpoint() {
        let dispatcher = NotificationDispatcher::new(None, Duration::from_secs(1)).unwrap();
        assert!(!dispatcher.is_configured());
        assert_eq!(dispatcher.notify(&payload()).await, NotifyOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_delivers_payload_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_partial_json(serde_json::json!({
                "status": "success",
                "file_size": 42,
                "output_file": "job.mp4"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let dispatcher = NotificationDispatcher::new(
            Some(format!("{}/hook", server.uri())),
            Duration::from_secs(5),
        )
        .unwrap();

        assert_eq!(dispatcher.notify(&payload()).await, NotifyOutcome::Delivered(200));
    }

    #[tokio::test]
    async fn test_non_2xx_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(1)
            .mount(&server)
            .await;

        let dispatcher =
            NotificationDispatcher::new(Some(server.uri()), Duration::from_secs(5)).unwrap();

        assert_eq!(dispatcher.notify(&payload()).await, NotifyOutcome::Rejected(503));
    }

    #[tokio::test]
    async fn test_timeout_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let dispatcher =
            NotificationDispatcher::new(Some(server.uri()), Duration::from_millis(100)).unwrap();

        assert!(matches!(
            dispatcher.notify(&payload()).await,
            NotifyOutcome::Failed(_)
        ));
    }
}

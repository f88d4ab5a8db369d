//! Outbound "all client steps submitted" signal.
//!
//! Emitted once per dossier when every CLIENT step of its product has been
//! handed over for review. Delivery goes through a [`SignalSink`]; the
//! production sink posts JSON to a webhook, the fallback only logs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Payload of the outbound signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientStepsSubmitted {
    pub dossier_id: Uuid,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("webhook failed: {0}")]
    WebhookFailed(String),
}

#[async_trait]
pub trait SignalSink: Send + Sync + 'static {
    async fn client_steps_submitted(&self, signal: &ClientStepsSubmitted)
        -> Result<(), SignalError>;
}

/// Posts the signal to a webhook with an `Idempotency-Key` header set to the
/// dossier id, so a receiver can drop redeliveries.
#[derive(Debug, Clone)]
pub struct WebhookSignalSink {
    client: reqwest::Client,
    url: String,
}

impl WebhookSignalSink {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, SignalError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SignalError::RequestFailed(e.to_string()))?;
        Ok(Self { client, url: url.into() })
    }
}

#[async_trait]
impl SignalSink for WebhookSignalSink {
    async fn client_steps_submitted(
        &self,
        signal: &ClientStepsSubmitted,
    ) -> Result<(), SignalError> {
        let response = self
            .client
            .post(&self.url)
            .header("Idempotency-Key", signal.dossier_id.to_string())
            .json(signal)
            .send()
            .await
            .map_err(|e| SignalError::RequestFailed(e.to_string()))?;

        if response.status().is_success() {
            info!(dossier_id = %signal.dossier_id, "Delivered client steps signal");
            Ok(())
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(SignalError::WebhookFailed(format!(
                "Status: {}, Body: {}",
                status, body
            )))
        }
    }
}

/// Used when no webhook is configured.
#[derive(Debug, Clone, Default)]
pub struct LogSignalSink;

#[async_trait]
impl SignalSink for LogSignalSink {
    async fn client_steps_submitted(
        &self,
        signal: &ClientStepsSubmitted,
    ) -> Result<(), SignalError> {
        info!(
            dossier_id = %signal.dossier_id,
            timestamp = %signal.timestamp,
            "All client steps submitted (no webhook configured)"
        );
        Ok(())
    }
}

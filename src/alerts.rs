use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

/// Fire-and-log notification sink. Out of scope as a real integration (no retries,
/// no delivery guarantees) — modeled as a trait the orchestrator
/// talks to, with a single generic-webhook implementation.
#[async_trait]
pub trait AlertNotifier: Send + Sync {
    async fn notify(&self, event_type: &str, payload: Value) -> anyhow::Result<()>;
}

/// Posts `{event_type, payload}` as JSON to a configured webhook URL, mirroring the
/// reference infrastructure's Slack/Discord/PagerDuty senders collapsed to one shape.
pub struct WebhookAlertNotifier {
    client: reqwest::Client,
    webhook_url: String,
}

impl WebhookAlertNotifier {
    pub fn new(webhook_url: String) -> Self {
        Self { client: reqwest::Client::new(), webhook_url }
    }
}

#[async_trait]
impl AlertNotifier for WebhookAlertNotifier {
    async fn notify(&self, event_type: &str, payload: Value) -> anyhow::Result<()> {
        let body = serde_json::json!({ "event_type": event_type, "payload": payload });
        let response = self.client.post(&self.webhook_url).json(&body).send().await?;

        if !response.status().is_success() {
            warn!(status = %response.status(), event_type, "alert webhook returned non-success status");
        }
        Ok(())
    }
}

/// No-op sink used when `ALERT_WEBHOOK_URL` is unset.
pub struct NullAlertNotifier;

#[async_trait]
impl AlertNotifier for NullAlertNotifier {
    async fn notify(&self, _event_type: &str, _payload: Value) -> anyhow::Result<()> {
        Ok(())
    }
}

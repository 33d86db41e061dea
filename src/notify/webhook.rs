use super::{Notification, Notifier};
use anyhow::{Context, Result};
use reqwest::Client;
use std::time::Duration;

/// Slack-style incoming webhook: POSTs `{"text": ...}`.
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, notification: &Notification) -> Result<()> {
        let payload = serde_json::json!({
            "text": notification.text(),
            "tests": notification.tests,
        });

        let resp = self
            .client
            .post(&self.url)
            .json(&payload)
            .send()
            .await
            .context("webhook request failed")?;

        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("webhook returned HTTP {}", status.as_u16());
        }

        tracing::info!(status = status.as_u16(), "webhook notification delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quarantine::QuarantineEntry;
    use chrono::Utc;

    #[tokio::test]
    async fn test_unreachable_webhook_errors() {
        // Port 9 on loopback: nothing listens, connection is refused.
        let notifier = WebhookNotifier::new("http://127.0.0.1:9/hook").unwrap();
        let n = Notification::for_new_quarantines(&[QuarantineEntry {
            test_identifier: "A/x".to_string(),
            reason: String::new(),
            skip_in_ci: true,
            failure_rate: 0.1,
            created: Utc::now(),
        }])
        .unwrap();
        assert!(notifier.send(&n).await.is_err());
    }
}

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use cartographus_core::alert::Alert;
use cartographus_core::notifier::Notifier;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use super::RateLimiter;

/// Posts `{alert, event_type: "detection_alert", timestamp, source:
/// "cartographus"}` plus caller-supplied headers to an arbitrary HTTP
/// endpoint.
pub struct GenericWebhookNotifier {
    name: String,
    url: String,
    headers: HashMap<String, String>,
    enabled: bool,
    client: reqwest::Client,
    limiter: RateLimiter,
    cancellation: CancellationToken,
}

impl GenericWebhookNotifier {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        headers: HashMap<String, String>,
        rate_limit: Duration,
        cancellation: CancellationToken,
    ) -> Self {
        GenericWebhookNotifier {
            name: name.into(),
            url: url.into(),
            headers,
            enabled: true,
            client: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(3))
                .timeout(Duration::from_secs(5))
                .build()
                .expect("reqwest client build"),
            limiter: RateLimiter::new(rate_limit),
            cancellation,
        }
    }
}

#[async_trait]
impl Notifier for GenericWebhookNotifier {
    fn name(&self) -> &str {
        &self.name
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    async fn send(&self, alert: &Alert) -> anyhow::Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.limiter.wait(&self.cancellation).await.is_err() {
            return Ok(());
        }
        self.limiter.record_attempt();

        let target = super::validate_webhook_url(&self.url).await?;
        let payload = serde_json::json!({
            "alert": alert,
            "event_type": "detection_alert",
            "timestamp": Utc::now(),
            "source": "cartographus",
        });

        let mut request = self.client.post(target).json(&payload);
        for (key, value) in &self.headers {
            request = request.header(key, value);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            anyhow::bail!("webhook responded with status {}", response.status());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cartographus_core::alert::Severity;

    fn sample_alert() -> Alert {
        Alert {
            id: "alrt_1".to_string(),
            rule_type: "impossible_travel".to_string(),
            user_id: 1,
            username: "alice".to_string(),
            server_id: None,
            machine_id: None,
            ip_address: None,
            severity: Severity::Critical,
            title: "Impossible travel detected".to_string(),
            message: "alice travelled too fast".to_string(),
            metadata: serde_json::json!({}),
            acknowledged: false,
            acknowledged_by: None,
            acknowledged_at: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn send_is_a_noop_when_disabled() {
        let mut notifier = GenericWebhookNotifier::new(
            "test",
            "https://example.invalid/hook",
            HashMap::new(),
            Duration::from_secs(1),
            CancellationToken::new(),
        );
        notifier.enabled = false;
        notifier.send(&sample_alert()).await.expect("disabled send is Ok");
    }

    #[tokio::test]
    async fn localhost_target_is_rejected() {
        let notifier = GenericWebhookNotifier::new(
            "test",
            "http://localhost:9999/hook",
            HashMap::new(),
            Duration::from_secs(1),
            CancellationToken::new(),
        );
        let err = notifier.send(&sample_alert()).await.unwrap_err();
        assert!(err.to_string().contains("not allowed"));
    }
}

use std::time::Duration;

use async_trait::async_trait;
use cartographus_core::alert::{Alert, Severity};
use cartographus_core::notifier::Notifier;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use super::RateLimiter;

fn severity_color(severity: Severity) -> u32 {
    match severity {
        Severity::Critical => 0xE74C3C, // red
        Severity::Warning => 0xE67E22,  // orange
        Severity::Info => 0x3498DB,     // blue
    }
}

fn truncate_machine_id(id: &str) -> String {
    if id.chars().count() > 12 {
        format!("{}...", id.chars().take(8).collect::<String>())
    } else {
        id.to_string()
    }
}

fn render_embed(alert: &Alert) -> serde_json::Value {
    let mut fields = vec![
        serde_json::json!({"name": "User", "value": alert.username, "inline": true}),
        serde_json::json!({"name": "Severity", "value": alert.severity.as_str(), "inline": true}),
        serde_json::json!({"name": "Rule Type", "value": alert.rule_type, "inline": true}),
    ];
    if let Some(ip) = alert.ip_address.as_deref().filter(|s| !s.is_empty()) {
        fields.push(serde_json::json!({"name": "IP", "value": ip, "inline": true}));
    }
    if let Some(machine_id) = alert.machine_id.as_deref().filter(|s| !s.is_empty()) {
        fields.push(serde_json::json!({
            "name": "Device",
            "value": truncate_machine_id(machine_id),
            "inline": true,
        }));
    }

    serde_json::json!({
        "embeds": [{
            "title": alert.title,
            "description": alert.message,
            "color": severity_color(alert.severity),
            "fields": fields,
            "footer": {"text": "cartographus"},
            "timestamp": alert.created_at,
        }]
    })
}

/// Renders an alert as a coloured chat embed and POSTs it to a webhook URL
/// (Discord/Slack-compatible payload shape).
pub struct ChatWebhookNotifier {
    name: String,
    url: String,
    enabled: bool,
    client: reqwest::Client,
    limiter: RateLimiter,
    cancellation: CancellationToken,
}

impl ChatWebhookNotifier {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        rate_limit: Duration,
        cancellation: CancellationToken,
    ) -> Self {
        ChatWebhookNotifier {
            name: name.into(),
            url: url.into(),
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
impl Notifier for ChatWebhookNotifier {
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
        let payload = render_embed(alert);
        let response = self.client.post(target).json(&payload).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("chat webhook responded with status {}", response.status());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_alert(severity: Severity) -> Alert {
        Alert {
            id: "alrt_1".to_string(),
            rule_type: "device_velocity".to_string(),
            user_id: 1,
            username: "alice".to_string(),
            server_id: None,
            machine_id: Some("0123456789abcdef".to_string()),
            ip_address: Some("203.0.113.1".to_string()),
            severity,
            title: "Device IP velocity exceeded".to_string(),
            message: "alice's device used 4 IPs in 5 minutes".to_string(),
            metadata: serde_json::json!({}),
            acknowledged: false,
            acknowledged_by: None,
            acknowledged_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn embed_colors_by_severity_and_truncates_machine_id() {
        let embed = render_embed(&sample_alert(Severity::Critical));
        let fields = embed["embeds"][0]["fields"].as_array().expect("fields");
        assert_eq!(embed["embeds"][0]["color"], 0xE74C3C);
        let device_field = fields
            .iter()
            .find(|f| f["name"] == "Device")
            .expect("device field present");
        assert_eq!(device_field["value"], "01234567...");
    }

    #[test]
    fn embed_omits_ip_and_device_fields_when_absent() {
        let mut alert = sample_alert(Severity::Info);
        alert.ip_address = None;
        alert.machine_id = None;
        let embed = render_embed(&alert);
        let fields = embed["embeds"][0]["fields"].as_array().expect("fields");
        assert!(!fields.iter().any(|f| f["name"] == "IP" || f["name"] == "Device"));
    }

    #[tokio::test]
    async fn send_is_a_noop_when_disabled() {
        let mut notifier = ChatWebhookNotifier::new(
            "test",
            "https://example.invalid/hook",
            Duration::from_secs(1),
            CancellationToken::new(),
        );
        notifier.enabled = false;
        notifier
            .send(&sample_alert(Severity::Warning))
            .await
            .expect("disabled send is Ok");
    }
}

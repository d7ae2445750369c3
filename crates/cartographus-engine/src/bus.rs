use async_trait::async_trait;
use cartographus_core::alert::Alert;
use cartographus_core::event::{DetectionEvent, RawEventEnvelope};
use chrono::Utc;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("malformed event payload: {0}")]
    MalformedJson(#[from] serde_json::Error),

    #[error("event payload is not a JSON object")]
    NotAnObject,
}

/// Forgiving parse of an inbound playback event. Missing or extra keys are
/// not errors — only payloads that are not valid JSON, or whose top-level
/// value is not an object, are rejected.
pub fn decode_event_envelope(bytes: &[u8]) -> Result<DetectionEvent, EnvelopeError> {
    let value: serde_json::Value = serde_json::from_slice(bytes)?;
    if !value.is_object() {
        return Err(EnvelopeError::NotAnObject);
    }
    let raw: RawEventEnvelope = serde_json::from_value(value)?;
    Ok(from_raw_envelope(raw))
}

fn from_raw_envelope(raw: RawEventEnvelope) -> DetectionEvent {
    DetectionEvent {
        event_id: raw.event_id.unwrap_or_default(),
        session_key: raw.session_key.unwrap_or_default(),
        correlation_key: raw.correlation_key.unwrap_or_default(),
        event_type: raw.event_type.unwrap_or_default(),
        source: raw.source.unwrap_or_default(),
        server_id: raw.server_id.unwrap_or_default(),
        timestamp: raw.timestamp.or(raw.started_at).unwrap_or_else(Utc::now),
        user_id: raw.user_id.unwrap_or_default(),
        username: raw.username.unwrap_or_default(),
        friendly_name: raw.friendly_name.unwrap_or_default(),
        machine_id: raw.machine_id.unwrap_or_default(),
        platform: raw.platform.unwrap_or_default(),
        player: raw.player.unwrap_or_default(),
        device: raw.device.unwrap_or_default(),
        media_type: raw.media_type.unwrap_or_default(),
        title: raw.title.unwrap_or_default(),
        grandparent_title: raw.grandparent_title.unwrap_or_default(),
        ip_address: raw.ip_address.unwrap_or_default(),
        location_type: raw.location_type.unwrap_or_default(),
        latitude: raw.latitude.unwrap_or_default(),
        longitude: raw.longitude.unwrap_or_default(),
        city: raw.city.unwrap_or_default(),
        region: raw.region.unwrap_or_default(),
        country: raw.country.unwrap_or_default(),
    }
}

/// Message attributes accompanying an outbound alert on the `detection.alerts`
/// topic, alongside the alert's JSON body.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundAlertAttributes {
    pub rule_type: String,
    pub severity: String,
    pub user_id: i64,
    pub server_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutboundAlertEnvelope {
    pub payload: Alert,
    pub attributes: OutboundAlertAttributes,
}

pub fn encode_alert_envelope(alert: &Alert) -> Result<OutboundAlertEnvelope, serde_json::Error> {
    // Round-trips through `serde_json::Value` purely to validate the alert
    // serialises cleanly before handing it to a transport.
    serde_json::to_value(alert)?;
    Ok(OutboundAlertEnvelope {
        payload: alert.clone(),
        attributes: OutboundAlertAttributes {
            rule_type: alert.rule_type.clone(),
            severity: alert.severity.as_str().to_string(),
            user_id: alert.user_id,
            server_id: alert.server_id.clone().filter(|s| !s.is_empty()),
        },
    })
}

/// Declared for callers who want to wire a real transport in. No concrete
/// implementation ships with this crate.
#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish_alert(&self, envelope: &OutboundAlertEnvelope) -> anyhow::Result<()>;

    async fn subscribe_events(&self) -> anyhow::Result<tokio::sync::mpsc::Receiver<DetectionEvent>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_ignores_unknown_keys_and_fills_defaults() {
        let bytes = br#"{"username": "alice", "user_id": 7, "unknown_field": true}"#;
        let event = decode_event_envelope(bytes).expect("decode");
        assert_eq!(event.username, "alice");
        assert_eq!(event.user_id, 7);
        assert_eq!(event.event_type, "");
    }

    #[test]
    fn decode_prefers_timestamp_over_started_at() {
        let bytes = br#"{"timestamp": "2024-01-01T00:00:00Z", "started_at": "2023-01-01T00:00:00Z"}"#;
        let event = decode_event_envelope(bytes).expect("decode");
        assert_eq!(event.timestamp.to_rfc3339(), "2024-01-01T00:00:00+00:00");
    }

    #[test]
    fn decode_rejects_non_object_payloads() {
        let err = decode_event_envelope(br#"[1, 2, 3]"#).unwrap_err();
        assert!(matches!(err, EnvelopeError::NotAnObject));
    }

    #[test]
    fn decode_rejects_malformed_json() {
        let err = decode_event_envelope(b"not json").unwrap_err();
        assert!(matches!(err, EnvelopeError::MalformedJson(_)));
    }

    #[test]
    fn encode_fills_attributes_from_the_alert() {
        let alert = Alert {
            id: "alrt_1".to_string(),
            rule_type: "geo_restriction".to_string(),
            user_id: 42,
            username: "bob".to_string(),
            server_id: Some("srv1".to_string()),
            machine_id: None,
            ip_address: None,
            severity: cartographus_core::alert::Severity::Warning,
            title: "t".to_string(),
            message: "m".to_string(),
            metadata: serde_json::json!({}),
            acknowledged: false,
            acknowledged_by: None,
            acknowledged_at: None,
            created_at: Utc::now(),
        };
        let envelope = encode_alert_envelope(&alert).expect("encode");
        assert_eq!(envelope.attributes.rule_type, "geo_restriction");
        assert_eq!(envelope.attributes.severity, "warning");
        assert_eq!(envelope.attributes.server_id.as_deref(), Some("srv1"));
    }
}

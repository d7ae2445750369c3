use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single playback state-change as understood by the detection engine.
///
/// Immutable once produced. Geo fields start out at the zero sentinel and
/// are enriched by the engine before detectors see the event, unless they
/// already arrived populated on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DetectionEvent {
    pub event_id: String,
    pub session_key: String,
    pub correlation_key: String,
    /// One of `start`, `stop`, `pause`, `resume`, or empty.
    pub event_type: String,
    pub source: String,
    pub server_id: String,
    pub timestamp: DateTime<Utc>,

    pub user_id: i64,
    pub username: String,
    pub friendly_name: String,

    pub machine_id: String,
    pub platform: String,
    pub player: String,
    pub device: String,

    pub media_type: String,
    pub title: String,
    pub grandparent_title: String,

    pub ip_address: String,
    /// `wan` or `lan`.
    pub location_type: String,

    pub latitude: f64,
    pub longitude: f64,
    pub city: String,
    pub region: String,
    pub country: String,
}

impl DetectionEvent {
    /// True iff `(latitude, longitude)` is the unknown-location sentinel.
    pub fn has_unknown_location(&self) -> bool {
        crate::geo::is_unknown_location(self.latitude, self.longitude)
    }

    pub fn apply_geolocation(&mut self, geo: &Geolocation) {
        self.latitude = geo.latitude;
        self.longitude = geo.longitude;
        self.city = geo.city.clone();
        self.region = geo.region.clone();
        self.country = geo.country.clone();
    }
}

/// The wire shape of an inbound playback event, exactly as the message-bus
/// adapter receives it. Every field is optional; unknown keys are ignored by
/// `serde` default behaviour (no `deny_unknown_fields` here, deliberately,
/// since the envelope parser must be forgiving).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawEventEnvelope {
    pub event_id: Option<String>,
    pub session_key: Option<String>,
    pub correlation_key: Option<String>,
    pub event_type: Option<String>,
    pub source: Option<String>,
    pub server_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,

    pub user_id: Option<i64>,
    pub username: Option<String>,
    pub friendly_name: Option<String>,

    pub machine_id: Option<String>,
    pub platform: Option<String>,
    pub player: Option<String>,
    pub device: Option<String>,

    pub media_type: Option<String>,
    pub title: Option<String>,
    pub grandparent_title: Option<String>,

    pub ip_address: Option<String>,
    pub location_type: Option<String>,

    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub city: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
}

/// IP address → geolocation. Lookup-only from the engine's perspective; the
/// table backing it is treated as given.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Geolocation {
    pub ip_address: String,
    pub latitude: f64,
    pub longitude: f64,
    pub city: String,
    pub region: String,
    pub country: String,
}

//! Great-circle distance, the unknown-location sentinel, and platform normalisation.
//!
//! Coordinate equality must never use direct float comparison against zero;
//! everything here goes through [`is_unknown_location`] instead.

/// Latitude/longitude pairs within this distance of zero, in degrees, are
/// treated as "no location known" rather than as the point at (0, 0).
const UNKNOWN_EPSILON: f64 = 1e-7;

const EARTH_RADIUS_KM: f64 = 6371.0;

/// Great-circle distance between two points in kilometres.
pub fn haversine_distance(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (lat1, lon1, lat2, lon2) = (
        lat1.to_radians(),
        lon1.to_radians(),
        lat2.to_radians(),
        lon2.to_radians(),
    );
    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    EARTH_RADIUS_KM * c
}

/// True iff both components are within [`UNKNOWN_EPSILON`] of zero, i.e. the
/// event's geolocation fields were never populated.
pub fn is_unknown_location(lat: f64, lon: f64) -> bool {
    lat.abs() < UNKNOWN_EPSILON && lon.abs() < UNKNOWN_EPSILON
}

/// Maps a freeform platform string (as reported by the upstream media
/// server) to a coarse family. Matching is case-insensitive and substring
/// based; the first matching family wins. Unrecognised strings pass through
/// unchanged so downstream rules can still compare them for equality.
pub fn normalise_platform(raw: &str) -> String {
    let lower = raw.to_lowercase();
    let families: &[(&str, &[&str])] = &[
        ("iOS", &["ios", "iphone", "ipad", "iop"]),
        ("Android", &["android"]),
        ("macOS", &["macos", "mac os", "osx", "os x"]),
        ("Windows", &["windows", "win32", "win64"]),
        ("Linux", &["linux"]),
        ("Web", &["web", "chrome", "firefox", "safari", "edge"]),
        (
            "SmartTV",
            &["tv", "roku", "firetv", "fire tv", "appletv", "apple tv", "tizen", "webos"],
        ),
        (
            "Console",
            &["playstation", "xbox", "nintendo", "ps4", "ps5"],
        ),
    ];
    for (family, needles) in families {
        if needles.iter().any(|n| lower.contains(n)) {
            return (*family).to_string();
        }
    }
    raw.to_string()
}

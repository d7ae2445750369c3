pub mod cache;
pub mod concurrent_streams;
pub mod device_velocity;
pub mod error;
pub mod geo_restriction;
pub mod impossible_travel;
pub mod simultaneous_locations;
pub mod user_agent_anomaly;
pub mod vpn_usage;

pub use cache::CachedEventHistory;
pub use concurrent_streams::ConcurrentStreamsDetector;
pub use device_velocity::DeviceVelocityDetector;
pub use error::DetectError;
pub use geo_restriction::GeoRestrictionDetector;
pub use impossible_travel::ImpossibleTravelDetector;
pub use simultaneous_locations::SimultaneousLocationsDetector;
pub use user_agent_anomaly::UserAgentAnomalyDetector;
pub use vpn_usage::VpnUsageDetector;

pub mod broadcaster;
pub mod bus;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod notifiers;

pub use broadcaster::BroadcastChannel;
pub use engine::Engine;
pub use error::EngineError;
pub use metrics::{Metrics, MetricsSnapshot};

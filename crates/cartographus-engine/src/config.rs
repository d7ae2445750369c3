/// Re-export `Config` from `cartographus-core` for use within this crate.
///
/// All environment-variable parsing lives in `cartographus-core` so it can
/// be shared with integration tests and future crates without depending on
/// the engine binary.
pub use cartographus_core::config::Config;

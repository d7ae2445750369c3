use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("one or more detectors failed: {0}")]
    DetectorFailure(String),
}

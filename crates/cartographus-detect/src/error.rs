use thiserror::Error;

#[derive(Debug, Error)]
pub enum DetectError {
    #[error("invalid detector configuration: {0}")]
    InvalidConfig(String),

    #[error("event history lookup failed: {0}")]
    History(#[from] anyhow::Error),
}

use thiserror::Error;

/// Terminal per-call errors of the review engine.
///
/// `NotFound`, `Forbidden`, and `InvalidState` never mutate state and are
/// never retried. `Transient` wraps store/notification I/O failures; the
/// difficulty tracker retries those once before giving up.
#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("not found")]
    NotFound,
    #[error("forbidden")]
    Forbidden,
    #[error("invalid state: {0}")]
    InvalidState(&'static str),
    #[error("transient store failure: {0}")]
    Transient(anyhow::Error),
}

impl From<anyhow::Error> for ReviewError {
    fn from(err: anyhow::Error) -> Self {
        Self::Transient(err)
    }
}

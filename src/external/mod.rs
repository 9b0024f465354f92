//! Seams to services the core does not own. Failures of the geocoder and
//! notifier are [`UpstreamError`]s: callers log them and degrade, they never
//! reach an HTTP response.

pub mod geocoder;
pub mod identity;
pub mod notifier;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream not configured: {0}")]
    Unavailable(String),

    #[error("upstream request failed: {0}")]
    Request(String),

    #[error("upstream returned status {0}")]
    Status(u16),

    #[error("upstream returned no result")]
    NoResult,
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        UpstreamError::Request(err.to_string())
    }
}

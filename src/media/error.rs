use super::types::PlatformId;
use crate::net::FetchError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("video not found or link expired: {0}")]
    NotFound(String),

    #[error("upstream request failed: {0}")]
    Upstream(FetchError),

    #[error("unrecognized {platform} response: {reason}")]
    ParseFailure { platform: PlatformId, reason: String },

    #[error("no resolver registered for {0}")]
    UnsupportedPlatform(PlatformId),
}

impl ResolveError {
    pub fn parse(platform: PlatformId, reason: impl Into<String>) -> Self {
        ResolveError::ParseFailure {
            platform,
            reason: reason.into(),
        }
    }

    /// Only transport trouble is worth retrying; the other kinds will not
    /// change on a second attempt.
    pub fn is_retriable(&self) -> bool {
        matches!(self, ResolveError::Upstream(e) if e.is_transient())
    }
}

impl From<FetchError> for ResolveError {
    fn from(error: FetchError) -> Self {
        match error {
            FetchError::HttpStatus(code @ (404 | 410)) => {
                ResolveError::NotFound(format!("upstream answered {}", code))
            }
            other => ResolveError::Upstream(other),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DownloadError {
    #[error("all media URLs failed: {}", .0.join("; "))]
    AllMediaUrlsFailed(Vec<String>),

    #[error("storage write failed: {0}")]
    StorageWriteFailed(String),

    #[error("download cancelled")]
    Cancelled,
}

//! Failure taxonomy for offload runs.

use thiserror::Error;

/// Errors surfaced by the offload core.
///
/// Page-level problems inside the local pipeline are handled there (the page
/// is skipped); only failures that terminate a whole run appear here.
#[derive(Debug, Error)]
pub enum OffloadError {
    /// Rendering or file I/O failed.
    #[error("I/O failure: {0:#}")]
    Io(anyhow::Error),

    /// A submission or poll could not be sent, or we gave up waiting.
    #[error("transport failure: {0:#}")]
    Transport(anyhow::Error),

    /// The remote service returned a malformed or unexpected response.
    #[error("protocol failure: {0}")]
    Protocol(String),

    /// The remote service reported a job-level error.
    #[error("remote job failed: {0}")]
    RemoteJob(String),
}

impl OffloadError {
    pub fn io(err: impl Into<anyhow::Error>) -> Self {
        OffloadError::Io(err.into())
    }

    pub fn transport(err: impl Into<anyhow::Error>) -> Self {
        OffloadError::Transport(err.into())
    }
}

impl From<std::io::Error> for OffloadError {
    fn from(err: std::io::Error) -> Self {
        OffloadError::Io(err.into())
    }
}

impl From<reqwest::Error> for OffloadError {
    fn from(err: reqwest::Error) -> Self {
        OffloadError::Transport(err.into())
    }
}

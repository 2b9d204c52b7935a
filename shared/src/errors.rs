/// Unified error types for the Gofer system.
use thiserror::Error;

/// Everything that can go wrong while serving a fetch request.
///
/// Each variant maps to a fixed HTTP status so the API surface stays
/// uniform regardless of which layer produced the failure.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Invalid or missing API key.")]
    Unauthorized,

    #[error("{0}")]
    InvalidRequest(String),

    /// The download tool exited non-zero; carries its captured stderr.
    #[error("yt-dlp failed: {0}")]
    DownloadFailed(String),

    /// The tool reported success but no artifact with the request's
    /// prefix could be correlated on disk.
    #[error("File not found after download. The downloader may have used a different name or format.")]
    FileNotFound,

    #[error("Internal error: {0}")]
    Internal(#[from] std::io::Error),
}

impl FetchError {
    /// HTTP status code this error surfaces as.
    pub fn status_code(&self) -> u16 {
        match self {
            FetchError::Unauthorized => 401,
            FetchError::InvalidRequest(_) => 400,
            FetchError::DownloadFailed(_)
            | FetchError::FileNotFound
            | FetchError::Internal(_) => 500,
        }
    }
}

/// Result type alias for fetch operations.
pub type FetchResult<T> = Result<T, FetchError>;

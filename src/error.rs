//! Error types for the render pipeline

use std::time::Duration;
use thiserror::Error;

/// Result type alias for render operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while rendering a page
#[derive(Error, Debug)]
pub enum Error {
    /// The URL is empty or not an absolute URL
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// A request or command-line argument is out of range
    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),

    /// The page did not finish loading before the deadline
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// The engine reported a failed load and strict mode is on
    #[error("Failed to load {0}")]
    LoadFailed(String),

    /// The render was cancelled through its `CancelToken`
    #[error("Render cancelled")]
    Cancelled,

    /// Capturing pixels from the engine failed
    #[error("Capture failed: {0}")]
    CaptureFailed(String),

    /// The output codec is unknown or could not encode the image
    #[error("Encoding failed: {0}")]
    EncodeFailed(String),

    /// No browser engine could be started or reached
    #[error("Engine unavailable: {0}")]
    EngineUnavailable(String),

    /// DevTools transport error
    #[cfg(feature = "cdp")]
    #[error("CDP error: {0}")]
    Cdp(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    pub(crate) fn invalid_url(url: &str, reason: impl ToString) -> Self {
        Error::InvalidUrl {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(feature = "cdp")]
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Cdp(err.to_string())
    }
}

impl From<image::ImageError> for Error {
    fn from(err: image::ImageError) -> Self {
        Error::EncodeFailed(err.to_string())
    }
}

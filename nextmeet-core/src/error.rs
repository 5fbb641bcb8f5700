//! Error types for the nextmeet ecosystem.

use thiserror::Error;

/// Errors that can occur in nextmeet operations.
#[derive(Error, Debug)]
pub enum NextmeetError {
    #[error("protocol decode error: {0}")]
    Decode(String),

    #[error("protocol encode error: {0}")]
    Encode(String),

    #[error("calendar fetch failed: {0}")]
    Fetch(String),

    #[error("calendar CLI '{0}' not found in PATH")]
    FetcherNotInstalled(String),

    #[error("calendar fetch timed out after {0}s")]
    FetchTimeout(u64),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for nextmeet operations.
pub type NextmeetResult<T> = Result<T, NextmeetError>;

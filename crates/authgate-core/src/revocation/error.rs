//! Revocation-specific error types

/// Errors that can occur while obtaining or parsing revocation data
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RevocationError {
    /// Failed to fetch the revocation list from its source
    #[error("CRL fetch failed: {0}")]
    FetchError(String),

    /// Failed to parse revocation data
    #[error("CRL parse error: {0}")]
    ParseError(String),

    /// CRL has expired (nextUpdate < current time)
    #[error("CRL expired: nextUpdate={0}")]
    CrlExpired(String),

    /// CRL is not yet valid (thisUpdate > current time)
    #[error("CRL not yet valid: thisUpdate={0}")]
    CrlNotYetValid(String),

    /// HTTP request failed or returned a non-success status
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Fetch did not complete in time
    #[error("CRL fetch timed out after {0}s")]
    HttpTimeout(u64),

    /// CRL exceeds maximum allowed size
    #[error("CRL size {0} bytes exceeds maximum {1} bytes")]
    CrlTooLarge(usize, usize),

    /// IO error reading a static CRL file
    #[error("IO error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for RevocationError {
    fn from(err: std::io::Error) -> Self {
        RevocationError::IoError(err.to_string())
    }
}

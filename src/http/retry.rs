//! Retry classification for catalog and artifact downloads.

use reqwest::StatusCode;
use thiserror::Error;

/// Maximum number of attempts for one network operation.
pub const MAX_RETRIES: usize = 3;

/// Delay between attempts in milliseconds.
pub const RETRY_DELAY_MS: u64 = 1000;

/// Failures that will not go away by asking again.
#[derive(Debug, Error)]
pub enum NonRetryableError {
    #[error("Too many requests to {0}. Try again later.")]
    RateLimited(String),

    #[error("Authentication required for {0}")]
    Unauthorized(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Access forbidden: {0}")]
    Forbidden(String),

    #[error("Request error: HTTP {status} for {url}")]
    ClientError { status: u16, url: String },
}

/// Split failures into retryable (`Ok`) and final (`Err`) ones.
pub fn classify_error(error: &reqwest::Error) -> Result<(), NonRetryableError> {
    let Some(status) = error.status() else {
        // Connection errors, timeouts and broken streams are worth another try
        return Ok(());
    };
    let url = error
        .url()
        .map(|u| u.to_string())
        .unwrap_or_else(|| "<unknown>".to_string());

    match status {
        StatusCode::UNAUTHORIZED => Err(NonRetryableError::Unauthorized(url)),
        StatusCode::FORBIDDEN => Err(NonRetryableError::Forbidden(url)),
        StatusCode::TOO_MANY_REQUESTS => Err(NonRetryableError::RateLimited(url)),
        StatusCode::NOT_FOUND => Err(NonRetryableError::NotFound(url)),
        s if s.is_client_error() => Err(NonRetryableError::ClientError {
            status: s.as_u16(),
            url,
        }),
        _ => Ok(()),
    }
}

/// Map an `error_for_status()` failure, keeping the reqwest error when a
/// retry may succeed.
pub fn check_retryable(error: reqwest::Error) -> anyhow::Error {
    match classify_error(&error) {
        Ok(()) => anyhow::Error::from(error),
        Err(non_retryable) => anyhow::Error::from(non_retryable),
    }
}

//! HTTP access for catalog sources and artifact downloads.

mod client;
mod retry;

pub use client::HttpClient;
pub use retry::{NonRetryableError, check_retryable, classify_error};

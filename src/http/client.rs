//! HTTP client with built-in retry logic and error handling.

use anyhow::{Context, Result, bail};
use log::{debug, warn};
use reqwest::Client;
use std::io::Write;

use super::retry::{MAX_RETRIES, NonRetryableError, RETRY_DELAY_MS, check_retryable};
use crate::job::Job;

/// HTTP client with built-in retry logic for network operations.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Fetch a text document such as a catalog source.
    /// Automatically retries on transient errors.
    #[tracing::instrument(skip(self))]
    pub async fn get_text(&self, url: &str) -> Result<String> {
        debug!("GET {}...", url);

        self.with_retry("GET", None, || async {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .context("Failed to send request")?;

            let response = response.error_for_status().map_err(check_retryable)?;

            response
                .text()
                .await
                .context("Failed to read response body")
        })
        .await
    }

    /// Stream `url` into the writer produced by `create_writer`.
    ///
    /// Progress is reported on `job` when the server announces a length.
    /// A cancelled job stops the transfer with an error and is not retried.
    #[tracing::instrument(skip(self, create_writer, job))]
    pub async fn download_file<W, F>(&self, url: &str, create_writer: F, job: &Job) -> Result<u64>
    where
        W: Write,
        F: Fn() -> Result<W>,
    {
        debug!("Downloading file from {}...", url);
        self.with_retry("Download", Some(job), || {
            self.download_file_once(url, &create_writer, job)
        })
        .await
    }

    async fn download_file_once<W, F>(&self, url: &str, create_writer: &F, job: &Job) -> Result<u64>
    where
        W: Write,
        F: Fn() -> Result<W>,
    {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to start download request")?;

        let mut response = response.error_for_status().map_err(check_retryable)?;
        let total = response.content_length().filter(|len| *len > 0);

        let mut writer = create_writer()?;
        let mut downloaded_bytes: u64 = 0;

        while let Some(chunk) = response
            .chunk()
            .await
            .context("Failed to read chunk from download stream")?
        {
            if job.is_cancelled() {
                bail!("Download of {} was cancelled", url);
            }
            writer
                .write_all(&chunk)
                .context("Failed to write chunk to file")?;
            downloaded_bytes += chunk.len() as u64;
            if let Some(total) = total {
                job.set_progress(downloaded_bytes as f64 / total as f64);
            }
        }
        writer.flush().context("Failed to flush downloaded file")?;

        debug!(
            "Downloaded {:.2} MB",
            downloaded_bytes as f64 / (1024.0 * 1024.0)
        );

        Ok(downloaded_bytes)
    }

    /// Run `operation` up to [`MAX_RETRIES`] times. Non-retryable errors
    /// and a cancelled `job` end the attempts early.
    async fn with_retry<F, Fut, T>(
        &self,
        operation_name: &str,
        job: Option<&Job>,
        operation: F,
    ) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut last_error = None;

        for attempt in 1..=MAX_RETRIES {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if job.is_some_and(Job::is_cancelled)
                        || e.downcast_ref::<NonRetryableError>().is_some()
                    {
                        debug!("{}: giving up: {}", operation_name, e);
                        return Err(e);
                    }

                    if attempt < MAX_RETRIES {
                        warn!(
                            "{}: attempt {}/{} failed ({}), retrying in {}ms...",
                            operation_name, attempt, MAX_RETRIES, e, RETRY_DELAY_MS
                        );
                        tokio::time::sleep(std::time::Duration::from_millis(RETRY_DELAY_MS)).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            anyhow::anyhow!("{}: failed after {} attempts", operation_name, MAX_RETRIES)
        }))
    }
}

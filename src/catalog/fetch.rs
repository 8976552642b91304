use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;
use std::path::PathBuf;
use std::sync::Arc;

use crate::http::HttpClient;
use crate::job::Job;
use crate::runtime::Runtime;

/// Retrieves the text of one catalog source.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CatalogFetcher: Send + Sync {
    async fn fetch(&self, url: &str, job: &Job) -> Result<String>;
}

/// Fetches `http(s)://` sources over the network and `file://` URLs or
/// plain paths from the local filesystem.
pub struct SourceFetcher<R: Runtime> {
    runtime: Arc<R>,
    http: HttpClient,
}

impl<R: Runtime> SourceFetcher<R> {
    pub fn new(runtime: Arc<R>, http: HttpClient) -> Self {
        Self { runtime, http }
    }
}

fn local_path(url: &str) -> Option<PathBuf> {
    if let Some(path) = url.strip_prefix("file://") {
        return Some(PathBuf::from(path));
    }
    if url.contains("://") {
        return None;
    }
    Some(PathBuf::from(url))
}

#[async_trait]
impl<R: Runtime + 'static> CatalogFetcher for SourceFetcher<R> {
    #[tracing::instrument(skip(self, job))]
    async fn fetch(&self, url: &str, job: &Job) -> Result<String> {
        let text = match local_path(url) {
            Some(path) => {
                debug!("Reading catalog source from {:?}", path);
                self.runtime
                    .read_to_string(&path)
                    .with_context(|| format!("Failed to read {:?}", path))?
            }
            None => self.http.get_text(url).await?,
        };
        job.complete();
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MockRuntime;
    use mockall::predicate::eq;

    fn http() -> HttpClient {
        HttpClient::new(reqwest::Client::new())
    }

    #[test]
    fn test_local_path() {
        assert_eq!(
            local_path("file:///srv/catalog.json"),
            Some(PathBuf::from("/srv/catalog.json"))
        );
        assert_eq!(local_path("catalog.json"), Some(PathBuf::from("catalog.json")));
        assert_eq!(local_path("https://example.org/catalog.json"), None);
    }

    #[tokio::test]
    async fn test_fetch_file_source_uses_runtime() {
        let mut runtime = MockRuntime::new();
        runtime
            .expect_read_to_string()
            .with(eq(PathBuf::from("/srv/catalog.json")))
            .returning(|_| Ok("{}".to_string()));

        let fetcher = SourceFetcher::new(Arc::new(runtime), http());
        let job = Job::new();
        let text = fetcher.fetch("file:///srv/catalog.json", &job).await.unwrap();

        assert_eq!(text, "{}");
        assert!(job.is_completed());
    }

    #[tokio::test]
    async fn test_fetch_http_source() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/catalog.json")
            .with_status(200)
            .with_body(r#"{"packages": []}"#)
            .create_async()
            .await;

        let fetcher = SourceFetcher::new(Arc::new(MockRuntime::new()), http());
        let text = fetcher
            .fetch(&format!("{}/catalog.json", server.url()), &Job::new())
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(text, r#"{"packages": []}"#);
    }
}

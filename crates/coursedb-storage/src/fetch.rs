//! Plain HTTP page fetching for the crawler sources. Failures surface to the caller, nothing is retried here.

use std::time::Duration;

use anyhow::Context;
use thiserror::Error;
use tracing::{debug, info_span, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    /// The registrar portal serves an incomplete certificate chain.
    pub accept_invalid_certs: bool,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            accept_invalid_certs: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .danger_accept_invalid_certs(config.accept_invalid_certs);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }

    /// GET `url` and return the decoded body of a 2xx response.
    pub async fn fetch_text(
        &self,
        run_id: Uuid,
        source_id: &str,
        url: &str,
    ) -> Result<String, FetchError> {
        let span = info_span!("http_fetch", %run_id, source_id, url);
        async {
            let resp = self.client.get(url).send().await?;
            let status = resp.status();
            if !status.is_success() {
                return Err(FetchError::HttpStatus {
                    status: status.as_u16(),
                    url: resp.url().to_string(),
                });
            }
            let body = resp.text().await?;
            debug!(bytes = body.len(), "fetched page");
            Ok(body)
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_portal_expectations() {
        let config = HttpClientConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(20));
        assert!(!config.accept_invalid_certs);
        assert!(HttpFetcher::new(config).is_ok());
    }

    #[tokio::test]
    async fn unreachable_host_is_a_request_error() {
        let fetcher = HttpFetcher::new(HttpClientConfig {
            timeout: Duration::from_millis(500),
            ..HttpClientConfig::default()
        })
        .expect("client");
        let err = fetcher
            .fetch_text(Uuid::new_v4(), "test", "http://127.0.0.1:9/nothing")
            .await
            .expect_err("port 9 refuses connections");
        assert!(matches!(err, FetchError::Request(_)));
    }
}

use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::ACCEPT;
use std::time::Duration;

const FEED_ACCEPT: &str = "text/calendar, text/plain, */*";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedResponse {
    pub status: u16,
    pub body: String,
}

impl FeedResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

#[async_trait]
pub trait FeedHttpClient: Send + Sync {
    async fn get(&self, url: &str, timeout: Duration) -> Result<FeedResponse, InfraError>;
}

#[derive(Debug, Clone, Default)]
pub struct ReqwestFeedClient {
    client: Client,
}

impl ReqwestFeedClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }

    fn network_error(url: &str, error: reqwest::Error) -> InfraError {
        let cause = if error.is_timeout() {
            format!("request timed out: {error}")
        } else {
            format!("network error: {error}")
        };
        InfraError::Transport {
            url: url.to_string(),
            attempts: 1,
            cause,
        }
    }
}

#[async_trait]
impl FeedHttpClient for ReqwestFeedClient {
    async fn get(&self, url: &str, timeout: Duration) -> Result<FeedResponse, InfraError> {
        if url.trim().is_empty() {
            return Err(InfraError::InvalidConfig("feed url must not be empty".to_string()));
        }

        let response = self
            .client
            .get(url)
            .header(ACCEPT, FEED_ACCEPT)
            .timeout(timeout)
            .send()
            .await
            .map_err(|error| Self::network_error(url, error))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|error| Self::network_error(url, error))?;

        Ok(FeedResponse { status, body })
    }
}

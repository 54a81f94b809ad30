// GitHub API HTTP client.
// Handles optional authentication, rate limit tracking, and status mapping.

use std::sync::Mutex;

use reqwest::{
    Client, Response, StatusCode,
    header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT},
};
use tracing::debug;

use crate::error::{DashError, Result};

use super::types::RateLimit;

const GITHUB_API_BASE: &str = "https://api.github.com";
const GITHUB_API_VERSION: &str = "2022-11-28";

/// GitHub API client with rate limit tracking.
///
/// Shared behind an `Arc`; the rate limit is updated through `&self`.
pub struct GitHubClient {
    client: Client,
    base_url: String,
    rate_limit: Mutex<RateLimit>,
}

impl GitHubClient {
    /// Create a client, authenticated when `token` is given.
    pub fn new(token: Option<&str>) -> Result<Self> {
        let mut headers = HeaderMap::new();

        if let Some(token) = token.filter(|t| !t.is_empty()) {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {}", token))
                    .map_err(|e| DashError::Other(e.to_string()))?,
            );
        }
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(
            "X-GitHub-Api-Version",
            HeaderValue::from_static(GITHUB_API_VERSION),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static("devdash"));

        let client = Client::builder().default_headers(headers).build()?;

        Ok(Self {
            client,
            base_url: GITHUB_API_BASE.to_string(),
            rate_limit: Mutex::new(RateLimit::default()),
        })
    }

    /// Point the client at another API root, e.g. GitHub Enterprise.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Rate limit reported by the last response.
    pub fn rate_limit(&self) -> RateLimit {
        *self.rate_limit.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make a GET request with query parameters.
    pub async fn get_with_params<T: serde::Serialize + ?Sized>(
        &self,
        endpoint: &str,
        params: &T,
    ) -> Result<Response> {
        let url = format!("{}{}", self.base_url, endpoint);
        debug!(url = %url, "GitHub request");
        let response = self.client.get(&url).query(params).send().await?;

        self.update_rate_limit(&response);
        self.check_response(response).await
    }

    /// Make a GET request to the GitHub API.
    pub async fn get(&self, endpoint: &str) -> Result<Response> {
        self.get_with_params(endpoint, &[] as &[(&str, &str)]).await
    }

    fn update_rate_limit(&self, response: &Response) {
        let header = |name: &str| -> Option<u64> {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
        };

        let mut rate_limit = self.rate_limit.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(limit) = header("x-ratelimit-limit") {
            rate_limit.limit = limit;
        }
        if let Some(remaining) = header("x-ratelimit-remaining") {
            rate_limit.remaining = remaining;
        }
        if let Some(reset) = header("x-ratelimit-reset") {
            rate_limit.reset = reset;
        }
    }

    /// Check response status and convert errors.
    async fn check_response(&self, response: Response) -> Result<Response> {
        match response.status() {
            StatusCode::OK => Ok(response),
            StatusCode::NOT_FOUND => Err(DashError::NotFound(response.url().to_string())),
            StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS
                if self.rate_limit().remaining == 0 =>
            {
                Err(DashError::RateLimited {
                    reset_at: format_reset(self.rate_limit().reset),
                })
            }
            status => Err(DashError::Other(format!(
                "HTTP {}: {}",
                status,
                response.text().await.unwrap_or_default()
            ))),
        }
    }
}

/// Wall-clock time of a rate limit reset given in Unix seconds.
fn format_reset(reset: u64) -> String {
    i64::try_from(reset)
        .ok()
        .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0))
        .map(|dt| dt.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_reset() {
        assert_eq!(format_reset(3661), "01:01:01");
        assert_eq!(format_reset(u64::MAX), "unknown");
    }

    #[test]
    fn test_client_construction() {
        let client = GitHubClient::new(None)
            .unwrap()
            .with_base_url("https://github.example.com/api/v3/");
        assert_eq!(client.base_url, "https://github.example.com/api/v3");
        assert_eq!(client.rate_limit(), RateLimit::default());

        assert!(GitHubClient::new(Some("bad\ntoken")).is_err());
    }
}

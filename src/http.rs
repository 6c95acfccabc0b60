//! HTTP transport used by the sitemap resolver and the article fetcher.
//!
//! The pipeline only needs "GET this URL, give me status and body", so the
//! transport is a one-method trait. Production code uses [`ReqwestHttp`];
//! tests substitute a scripted implementation.

use crate::error::FetchError;
use std::time::Duration;
use tracing::{debug, instrument};

/// Browser-like User-Agent; several outlets refuse obvious bots.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/116.0.0.0 Safari/537.36";

/// Status and body of a completed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: String::new(),
        }
    }

    /// The body of a 2xx response, or a [`FetchError::Status`].
    pub fn into_body(self, url: &str) -> Result<String, FetchError> {
        if (200..300).contains(&self.status) {
            Ok(self.body)
        } else {
            Err(FetchError::Status {
                url: url.to_string(),
                status: self.status,
            })
        }
    }
}

/// Minimal async GET.
pub trait HttpGet {
    /// Perform one request. Non-2xx statuses are returned, not raised.
    async fn get(&self, url: &str) -> Result<HttpResponse, FetchError>;
}

impl<T: HttpGet> HttpGet for &T {
    async fn get(&self, url: &str) -> Result<HttpResponse, FetchError> {
        (**self).get(url).await
    }
}

/// [`HttpGet`] backed by a shared `reqwest` connection pool.
#[derive(Debug, Clone)]
pub struct ReqwestHttp {
    client: reqwest::Client,
}

impl ReqwestHttp {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl HttpGet for ReqwestHttp {
    #[instrument(level = "debug", skip_all, fields(%url))]
    async fn get(&self, url: &str) -> Result<HttpResponse, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| classify(url, e))?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| classify(url, e))?;
        debug!(status, bytes = body.len(), "GET complete");
        Ok(HttpResponse { status, body })
    }
}

/// Map a `reqwest` failure onto the fetch error taxonomy.
fn classify(url: &str, e: reqwest::Error) -> FetchError {
    let url = url.to_string();
    if e.is_timeout() {
        FetchError::Timeout { url }
    } else if e.is_builder() {
        FetchError::InvalidUrl {
            url,
            message: e.to_string(),
        }
    } else if e.is_decode() || e.is_redirect() {
        FetchError::Malformed {
            url,
            message: e.to_string(),
        }
    } else {
        // connect, request and mid-body resets
        FetchError::Connect {
            url,
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_body_success() {
        let body = HttpResponse::ok("<urlset/>").into_body("https://a.com").unwrap();
        assert_eq!(body, "<urlset/>");
    }

    #[test]
    fn test_into_body_error_status() {
        let err = HttpResponse::status(503)
            .into_body("https://a.com/x")
            .unwrap_err();
        assert_eq!(
            err,
            FetchError::Status {
                url: "https://a.com/x".into(),
                status: 503
            }
        );
        assert!(err.is_transient());
    }

    #[test]
    fn test_reqwest_client_builds() {
        assert!(ReqwestHttp::new(DEFAULT_USER_AGENT, Duration::from_secs(5)).is_ok());
    }
}

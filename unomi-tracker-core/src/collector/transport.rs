//! HTTP transport seam
//!
//! The collector and the context store only speak [`HttpRequest`]/[`HttpResponse`].
//! [`ReqwestTransport`] is the production implementation; tests swap in their own.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CONTENT_TYPE};

use crate::error::{Error, Result};

/// Content type that keeps cross-origin POSTs free of a CORS preflight
pub const TEXT_PLAIN_UTF8: &str = "text/plain;charset=UTF-8";

/// HTTP method used by the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

/// Outgoing request
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    /// Body, always sent as `text/plain;charset=UTF-8`
    pub body: Option<String>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            body: Some(body.into()),
        }
    }
}

/// Raw response as returned by the transport
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    /// The context server answers 200, 204 or 304 on success
    pub fn is_success(&self) -> bool {
        matches!(self.status, 200 | 204 | 304)
    }
}

/// Executes one HTTP exchange
///
/// Implementations return `Ok` for any response that arrived, whatever its
/// status, and `Err(Error::Transport)` when no response arrived at all.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// reqwest-backed transport
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http_client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        let http_client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { http_client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse> {
        let builder = match request.method {
            Method::Get => self.http_client.get(&request.url),
            Method::Post => self
                .http_client
                .post(&request.url)
                .header(CONTENT_TYPE, TEXT_PLAIN_UTF8)
                .body(request.body.unwrap_or_default()),
        };

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Transport(format!("HTTP request failed: {}", e)))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| Error::Transport(format!("failed to read response body: {}", e)))?;

        Ok(HttpResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_statuses() {
        for status in [200, 204, 304] {
            assert!(HttpResponse {
                status,
                body: String::new()
            }
            .is_success());
        }
        for status in [201, 301, 404, 500] {
            assert!(!HttpResponse {
                status,
                body: String::new()
            }
            .is_success());
        }
    }

    #[test]
    fn test_request_builders() {
        let get = HttpRequest::get("http://localhost/x");
        assert_eq!(get.method, Method::Get);
        assert!(get.body.is_none());

        let post = HttpRequest::post("http://localhost/x", "{}");
        assert_eq!(post.method.as_str(), "POST");
        assert_eq!(post.body.as_deref(), Some("{}"));
    }
}

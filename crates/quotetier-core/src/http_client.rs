//! HTTP transport seam for upstream adapters.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;

/// A GET against a provider endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
    pub timeout: Duration,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            query: Vec::new(),
            timeout: Duration::from_secs(3),
        }
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// URL with percent-encoded query parameters, in insertion order.
    pub fn full_url(&self) -> String {
        if self.query.is_empty() {
            return self.url.clone();
        }
        let query = self
            .query
            .iter()
            .map(|(name, value)| {
                format!("{}={}", urlencoding::encode(name), urlencoding::encode(value))
            })
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{query}", self.url)
    }

    /// Same as [`Self::full_url`] with the `apikey` value masked, for logs.
    pub fn redacted_url(&self) -> String {
        let masked = Self {
            query: self
                .query
                .iter()
                .map(|(name, value)| {
                    let value = if name == "apikey" { "***" } else { value.as_str() };
                    (name.clone(), value.to_owned())
                })
                .collect(),
            ..self.clone()
        };
        masked.full_url()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// The request produced no response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HttpError {
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("request failed: {0}")]
    Request(String),
}

pub trait HttpClient: Send + Sync {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>>;
}

/// reqwest-backed transport.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
    client: reqwest::Client,
}

impl ReqwestHttpClient {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("quotetier/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|error| {
                tracing::warn!(%error, "falling back to a default http client");
                reqwest::Client::new()
            });
        Self { client }
    }
}

impl Default for ReqwestHttpClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient for ReqwestHttpClient {
    fn execute<'a>(
        &'a self,
        request: HttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
        Box::pin(async move {
            tracing::trace!(url = %request.redacted_url(), "http get");
            let response = self
                .client
                .get(request.full_url())
                .timeout(request.timeout)
                .send()
                .await
                .map_err(|error| {
                    if error.is_timeout() {
                        HttpError::Timeout(error.to_string())
                    } else if error.is_connect() {
                        HttpError::Connect(error.to_string())
                    } else {
                        HttpError::Request(error.to_string())
                    }
                })?;

            let status = response.status().as_u16();
            let body = response
                .text()
                .await
                .map_err(|error| HttpError::Request(format!("reading body: {error}")))?;

            Ok(HttpResponse { status, body })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_parameters_are_percent_encoded_in_order() {
        let request = HttpRequest::get("https://av.test/query")
            .with_query("function", "GLOBAL_QUOTE")
            .with_query("symbol", "BRK.B & co");

        assert_eq!(
            request.full_url(),
            "https://av.test/query?function=GLOBAL_QUOTE&symbol=BRK.B%20%26%20co"
        );
    }

    #[test]
    fn the_api_key_never_reaches_log_output() {
        let request = HttpRequest::get("https://av.test/query")
            .with_query("symbol", "IBM")
            .with_query("apikey", "secret");

        assert_eq!(
            request.redacted_url(),
            "https://av.test/query?symbol=IBM&apikey=%2A%2A%2A"
        );
        assert!(request.full_url().ends_with("apikey=secret"));
    }
}

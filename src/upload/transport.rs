//! Network seam for batch delivery.
//!
//! The delivery client only needs "send this body, tell me the status".
//! [`HttpTransport`] does that over reqwest; tests substitute their own.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Client;

/// One POST of a serialized batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Send the request. `Ok` carries the HTTP status of the response,
    /// `Err` a network-level failure.
    async fn post(&self, request: OutboundRequest) -> Result<u16, String>;
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, String> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| format!("Failed to build HTTP client: {}", e))?;
        Ok(HttpTransport { client })
    }

    fn header_map(headers: &[(String, String)]) -> Result<HeaderMap, String> {
        let mut out = HeaderMap::new();
        out.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        for (key, value) in headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|_| format!("Invalid header name: {}", key))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| format!("Invalid header value for {}", key))?;
            out.insert(name, value);
        }
        Ok(out)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, request: OutboundRequest) -> Result<u16, String> {
        let headers = Self::header_map(&request.headers)?;
        let response = self
            .client
            .post(&request.url)
            .headers(headers)
            .body(request.body)
            .send()
            .await
            .map_err(|e| format!("Request to {} failed: {}", request.url, e))?;
        Ok(response.status().as_u16())
    }
}

// src/utils/http.rs
use std::time::Duration;
use async_trait::async_trait;
use reqwest::{Client, header::{HeaderMap, HeaderName, HeaderValue}};
use tracing::debug;

use crate::core::collab::Transport;
use crate::error::{ReconError, ReconResult};

/// HTTP client for making requests
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(user_agent: Option<String>, timeout_secs: Option<u64>) -> ReconResult<Self> {
        let user_agent = user_agent.unwrap_or_else(|| format!("reconsrc/{}", env!("CARGO_PKG_VERSION")));
        let timeout = Duration::from_secs(timeout_secs.unwrap_or(30));

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(&user_agent)
            .build()
            .map_err(|e| ReconError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    fn header_map(url: &str, headers: &[(String, String)]) -> ReconResult<HeaderMap> {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ReconError::transport(url, format!("bad header name {}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ReconError::transport(url, format!("bad header value: {}", e)))?;
            map.insert(name, value);
        }
        Ok(map)
    }
}

#[async_trait]
impl Transport for HttpClient {
    async fn fetch(
        &self,
        url: &str,
        body: Option<String>,
        headers: &[(String, String)],
    ) -> ReconResult<String> {
        let headers = Self::header_map(url, headers)?;

        let request = match body {
            Some(body) => {
                debug!("POST {}", url);
                self.client.post(url).headers(headers).body(body)
            }
            None => {
                debug!("GET {}", url);
                self.client.get(url).headers(headers)
            }
        };

        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ReconError::transport(url, format!("HTTP status {}", status)));
        }

        Ok(response.text().await?)
    }
}

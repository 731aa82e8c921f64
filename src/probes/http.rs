//! HTTP probe implementation.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::debug;

use super::{Probe, ProbeError, infer_port};
use crate::wire::SchedulerType;

/// Default timeout for HTTP checks
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Passes when the target answers with exactly the expected status code
pub struct HttpProbe {
    client: reqwest::Client,
    method: reqwest::Method,
    url: String,
    headers: HeaderMap,
    expected_status: u16,
    port: u16,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(
        url: &str,
        method: &str,
        headers: &HashMap<String, String>,
        expected_status: u16,
        timeout: Duration,
    ) -> Result<Self, ProbeError> {
        let method = reqwest::Method::from_bytes(method.to_uppercase().as_bytes())
            .map_err(|e| ProbeError::Config(format!("invalid method {}: {}", method, e)))?;

        let mut header_map = HeaderMap::with_capacity(headers.len());
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ProbeError::Config(format!("invalid header {}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ProbeError::Config(format!("invalid header value: {}", e)))?;
            header_map.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProbeError::Config(e.to_string()))?;

        Ok(Self {
            client,
            method,
            url: url.to_string(),
            headers: header_map,
            expected_status,
            port: infer_port(url),
            timeout,
        })
    }
}

#[async_trait]
impl Probe for HttpProbe {
    fn kind(&self) -> SchedulerType {
        SchedulerType::Http
    }

    fn location(&self) -> &str {
        &self.url
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn check(&self) -> Result<(), ProbeError> {
        let response = self
            .client
            .request(self.method.clone(), &self.url)
            .headers(self.headers.clone())
            .send()
            .await
            .map_err(|e| ProbeError::from_reqwest(e, self.timeout))?;

        let actual = response.status().as_u16();
        // Only the status matters; release the connection without reading the body.
        drop(response);

        if actual != self.expected_status {
            debug!(url = %self.url, expected = self.expected_status, actual, "unexpected status");
            return Err(ProbeError::WrongStatusCode {
                expected: self.expected_status,
                actual,
            });
        }
        Ok(())
    }
}

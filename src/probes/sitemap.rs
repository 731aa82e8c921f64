//! Site-map crawl probe.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, stream};
use regex::Regex;
use tracing::debug;

use super::{Probe, ProbeError, infer_port};
use crate::wire::SchedulerType;

/// Default number of locations requested at once
pub const DEFAULT_SITEMAP_CONCURRENCY: usize = 8;

/// A crawl may take this many per-request timeouts before it is cut off
const CRAWL_DEADLINE_FACTOR: u32 = 10;

static LOC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<loc>\s*(?:<!\[CDATA\[(.*?)\]\]>|(.*?))\s*</loc>").expect("loc pattern is valid")
});

static ENTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(?:#x([0-9A-Fa-f]+)|#([0-9]+)|(lt|gt|quot|apos|amp));")
        .expect("entity pattern is valid")
});

/// Passes when every location listed in the sitemap answers 200
pub struct SitemapProbe {
    client: reqwest::Client,
    url: String,
    concurrency: usize,
    port: u16,
    timeout: Duration,
}

impl SitemapProbe {
    pub fn new(url: &str, concurrency: usize, timeout: Duration) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProbeError::Config(e.to_string()))?;

        Ok(Self {
            client,
            url: url.to_string(),
            concurrency: concurrency.max(1),
            port: infer_port(url),
            timeout,
        })
    }

    async fn fetch_status(&self, location: &str) -> Result<u16, ProbeError> {
        let response = self
            .client
            .get(location)
            .send()
            .await
            .map_err(|e| ProbeError::from_reqwest(e, self.timeout))?;
        Ok(response.status().as_u16())
    }
}

/// Every `<loc>` entry of a sitemap document, in document order
///
/// CDATA sections are taken verbatim; other text has its entity and
/// character references resolved.
pub fn extract_locations(document: &str) -> Vec<String> {
    LOC_RE
        .captures_iter(document)
        .filter_map(|caps| match (caps.get(1), caps.get(2)) {
            (Some(cdata), _) => Some(cdata.as_str().trim().to_string()),
            (None, Some(text)) => Some(unescape_xml(text.as_str())),
            (None, None) => None,
        })
        .filter(|loc| !loc.is_empty())
        .collect()
}

fn unescape_xml(text: &str) -> String {
    ENTITY_RE
        .replace_all(text, |caps: &regex::Captures| {
            let code = match (caps.get(1), caps.get(2)) {
                (Some(hex), _) => u32::from_str_radix(hex.as_str(), 16).ok(),
                (None, Some(dec)) => dec.as_str().parse().ok(),
                (None, None) => {
                    return match &caps[3] {
                        "lt" => "<",
                        "gt" => ">",
                        "quot" => "\"",
                        "apos" => "'",
                        _ => "&",
                    }
                    .to_string();
                }
            };
            // Unrepresentable references stay as written.
            code.and_then(char::from_u32)
                .map(String::from)
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

#[async_trait]
impl Probe for SitemapProbe {
    fn kind(&self) -> SchedulerType {
        SchedulerType::SiteMap
    }

    fn location(&self) -> &str {
        &self.url
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn timeout(&self) -> Duration {
        self.timeout.saturating_mul(CRAWL_DEADLINE_FACTOR)
    }

    async fn check(&self) -> Result<(), ProbeError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| ProbeError::from_reqwest(e, self.timeout))?;
        let status = response.status().as_u16();
        if status != 200 {
            return Err(ProbeError::WrongStatusCode {
                expected: 200,
                actual: status,
            });
        }
        let document = response
            .text()
            .await
            .map_err(|e| ProbeError::from_reqwest(e, self.timeout))?;

        let locations = extract_locations(&document);
        if locations.is_empty() {
            return Err(ProbeError::Protocol("sitemap lists no locations".to_string()));
        }
        debug!(sitemap = %self.url, count = locations.len(), "crawling sitemap");

        // `buffered` keeps document order, so the first failure reported is
        // the first failing location in the sitemap.
        let mut results = stream::iter(locations)
            .map(|location| async move {
                let outcome = self.fetch_status(&location).await;
                (location, outcome)
            })
            .buffered(self.concurrency);

        while let Some((location, outcome)) = results.next().await {
            match outcome {
                Ok(200) => {}
                Ok(actual) => {
                    return Err(ProbeError::Location {
                        location,
                        reason: ProbeError::WrongStatusCode {
                            expected: 200,
                            actual,
                        }
                        .to_string(),
                    });
                }
                Err(e) => {
                    return Err(ProbeError::Location {
                        location,
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok(())
    }
}

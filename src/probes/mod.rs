//! Probes: one protocol-specific health check each
//!
//! A probe never fails: every execution, including transport errors and
//! timeouts, ends in a [`ProbeResult`]. Implementations only describe *how*
//! to check ([`Probe::check`]); [`Probe::execute`] applies the deadline,
//! measures the run and folds any [`ProbeError`] into an Error result.

mod grpc;
mod http;
mod sitemap;
mod tcp;

pub use grpc::*;
pub use http::*;
pub use sitemap::*;
pub use tcp::*;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;
use url::Url;

use crate::config::{ProbeConfig, ResolvedCheckConfig};
use crate::wire::SchedulerType;

/// Probe error types.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("WRONG_STATUS_CODE")]
    WrongStatusCode { expected: u16, actual: u16 },
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("service not serving: {0}")]
    NotServing(String),
    #[error("{location}: {reason}")]
    Location { location: String, reason: String },
}

impl ProbeError {
    pub(crate) fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            ProbeError::Timeout(timeout)
        } else {
            ProbeError::Network(err.to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProbeStatus {
    Ok,
    Error,
}

/// Outcome of one probe execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub id: String,
    pub kind: SchedulerType,
    pub status: ProbeStatus,
    /// Empty on success, the failure cause otherwise
    pub description: String,
    pub location: String,
    pub port: u16,
    /// When the execution started
    pub timestamp: DateTime<Utc>,
    pub elapsed: Duration,
}

impl ProbeResult {
    pub fn is_ok(&self) -> bool {
        self.status == ProbeStatus::Ok
    }
}

/// A protocol-specific health check
#[async_trait]
pub trait Probe: Send + Sync {
    fn kind(&self) -> SchedulerType;

    /// Target as configured
    fn location(&self) -> &str;

    fn port(&self) -> u16;

    /// Upper bound for one execution
    fn timeout(&self) -> Duration;

    /// Run the check once
    async fn check(&self) -> Result<(), ProbeError>;

    /// Run the check under its deadline and record the outcome
    async fn execute(&self) -> ProbeResult {
        let timestamp = Utc::now();
        let start = Instant::now();

        let outcome = match tokio::time::timeout(self.timeout(), self.check()).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ProbeError::Timeout(self.timeout())),
        };
        let elapsed = start.elapsed();

        let (status, description) = match outcome {
            Ok(()) => (ProbeStatus::Ok, String::new()),
            Err(e) => (ProbeStatus::Error, e.to_string()),
        };
        trace!(location = self.location(), ?status, ?elapsed, "probe executed");

        ProbeResult {
            id: uuid::Uuid::new_v4().to_string(),
            kind: self.kind(),
            status,
            description,
            location: self.location().to_string(),
            port: self.port(),
            timestamp,
            elapsed,
        }
    }
}

/// Port a location talks to: the explicit one if present, else 443 for
/// secure schemes and 80 otherwise
pub fn infer_port(location: &str) -> u16 {
    match Url::parse(location) {
        Ok(url) => url.port().unwrap_or(match url.scheme() {
            "https" | "wss" | "grpcs" => 443,
            _ => 80,
        }),
        Err(_) if location.starts_with("https") => 443,
        Err(_) => 80,
    }
}

/// Instantiate the probe a check is configured with
pub fn build_probe(check: &ResolvedCheckConfig) -> Result<Box<dyn Probe>, ProbeError> {
    let timeout = check.timeout;
    let probe: Box<dyn Probe> = match &check.probe {
        ProbeConfig::Http {
            url,
            method,
            headers,
            expected_status,
        } => Box::new(HttpProbe::new(
            url,
            method,
            headers,
            *expected_status,
            timeout,
        )?),
        ProbeConfig::Tcp { host, port } => Box::new(TcpProbe::new(host, *port, timeout)?),
        ProbeConfig::Grpc { url, service } => Box::new(GrpcProbe::new(url, service, timeout)?),
        ProbeConfig::Sitemap { url, concurrency } => {
            Box::new(SitemapProbe::new(url, *concurrency, timeout)?)
        }
    };
    Ok(probe)
}

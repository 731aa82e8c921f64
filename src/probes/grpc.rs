//! gRPC health-check probe.
//!
//! Calls `grpc.health.v1.Health/Check` through the generated client in
//! `tonic-health`. Each check dials a fresh connection so a dead server is
//! noticed on the next run rather than hidden behind a pooled channel.

use std::time::Duration;

use async_trait::async_trait;
use tonic::{
    Code, Status,
    transport::{ClientTlsConfig, Endpoint},
};
use tonic_health::pb::{
    HealthCheckRequest, health_check_response::ServingStatus, health_client::HealthClient,
};

use super::{Probe, ProbeError, infer_port};
use crate::wire::SchedulerType;

/// Passes when the health service answers `SERVING`
pub struct GrpcProbe {
    endpoint: Endpoint,
    url: String,
    service: String,
    port: u16,
    timeout: Duration,
}

impl GrpcProbe {
    pub fn new(url: &str, service: &str, timeout: Duration) -> Result<Self, ProbeError> {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ProbeError::Config(format!(
                "grpc probe url must be http(s): {}",
                url
            )));
        }

        let url = url.trim_end_matches('/').to_string();
        let mut endpoint = Endpoint::from_shared(url.clone())
            .map_err(|e| ProbeError::Config(e.to_string()))?
            .connect_timeout(timeout)
            .timeout(timeout);
        if url.starts_with("https://") {
            endpoint = endpoint
                .tls_config(ClientTlsConfig::new().with_webpki_roots())
                .map_err(|e| ProbeError::Config(e.to_string()))?;
        }

        Ok(Self {
            endpoint,
            port: infer_port(&url),
            url,
            service: service.to_string(),
            timeout,
        })
    }

    fn status_error(&self, status: Status) -> ProbeError {
        match status.code() {
            Code::DeadlineExceeded => ProbeError::Timeout(self.timeout),
            Code::Unavailable => ProbeError::Network(status.message().to_string()),
            code => ProbeError::Protocol(format!("grpc-status {:?}: {}", code, status.message())),
        }
    }
}

#[async_trait]
impl Probe for GrpcProbe {
    fn kind(&self) -> SchedulerType {
        SchedulerType::Grpc
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
        let channel = self
            .endpoint
            .connect()
            .await
            .map_err(|e| ProbeError::Network(e.to_string()))?;

        let response = HealthClient::new(channel)
            .check(HealthCheckRequest {
                service: self.service.clone(),
            })
            .await
            .map_err(|status| self.status_error(status))?;

        match response.into_inner().status() {
            ServingStatus::Serving => Ok(()),
            other => Err(ProbeError::NotServing(other.as_str_name().to_string())),
        }
    }
}

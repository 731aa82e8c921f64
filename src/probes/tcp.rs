//! TCP connect probe.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;

use super::{Probe, ProbeError};
use crate::wire::SchedulerType;

/// Passes when a TCP connection can be established
pub struct TcpProbe {
    host: String,
    port: u16,
    location: String,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(host: &str, port: u16, timeout: Duration) -> Result<Self, ProbeError> {
        if host.is_empty() {
            return Err(ProbeError::Config("tcp probe needs a host".to_string()));
        }
        if port == 0 {
            return Err(ProbeError::Config("tcp probe needs a non-zero port".to_string()));
        }

        Ok(Self {
            host: host.to_string(),
            port,
            location: format!("tcp://{}:{}", host, port),
            timeout,
        })
    }
}

#[async_trait]
impl Probe for TcpProbe {
    fn kind(&self) -> SchedulerType {
        SchedulerType::Tcp
    }

    fn location(&self) -> &str {
        &self.location
    }

    fn port(&self) -> u16 {
        self.port
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn check(&self) -> Result<(), ProbeError> {
        let stream = tokio::time::timeout(
            self.timeout,
            TcpStream::connect((self.host.as_str(), self.port)),
        )
        .await
        .map_err(|_| ProbeError::Timeout(self.timeout))?
        .map_err(|e| ProbeError::Network(e.to_string()))?;

        drop(stream);
        Ok(())
    }
}

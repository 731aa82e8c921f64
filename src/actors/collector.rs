//! CollectorActor - polls one agent's `/metrics` endpoint
//!
//! ```text
//! Timer tick → GET {agent}/metrics → parse Metric → Publish StatEvent → [StorageActor]
//!     ↑
//!     └─── Commands (PollNow, UpdateInterval, Shutdown)
//! ```
//!
//! A failed poll is logged and retried on the next tick; it never stops the
//! actor.

use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::interval;
use tracing::{debug, error, instrument, trace, warn};

use crate::{config::ResolvedAgentConfig, wire::Metric};

use super::messages::{CollectorCommand, StatEvent};

/// Header carrying the agent's shared secret
pub const SECRET_HEADER: &str = "X-MONITORING-SECRET";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Actor that polls a single agent
pub struct CollectorActor {
    config: ResolvedAgentConfig,

    /// Reused across polls
    client: reqwest::Client,

    command_rx: mpsc::Receiver<CollectorCommand>,

    stat_tx: broadcast::Sender<StatEvent>,

    interval_duration: Duration,
}

impl CollectorActor {
    pub fn new(
        config: ResolvedAgentConfig,
        command_rx: mpsc::Receiver<CollectorCommand>,
        stat_tx: broadcast::Sender<StatEvent>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;
        let interval_duration = config.interval;

        Ok(Self {
            config,
            client,
            command_rx,
            stat_tx,
            interval_duration,
        })
    }

    #[instrument(skip(self), fields(agent = %self.config.id))]
    pub async fn run(mut self) {
        debug!("starting collector actor");

        let mut ticker = interval(self.interval_duration);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_metrics().await {
                        error!("failed to poll metrics: {:#}", e);
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        CollectorCommand::PollNow { respond_to } => {
                            debug!("received PollNow command");
                            let result = self.poll_metrics().await;
                            let _ = respond_to.send(result);
                        }

                        CollectorCommand::UpdateInterval { interval_secs } => {
                            debug!("updating interval to {interval_secs}s");
                            self.interval_duration = Duration::from_secs(interval_secs.max(1));
                            ticker = interval(self.interval_duration);
                        }

                        CollectorCommand::Shutdown => {
                            debug!("received shutdown command");
                            break;
                        }
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        debug!("collector actor stopped");
    }

    async fn poll_metrics(&self) -> Result<()> {
        let url = format!("{}/metrics", self.config.url);

        trace!("requesting metrics from {url}");

        let mut request = self.client.get(&url);
        if let Some(token) = &self.config.token {
            request = request.header(SECRET_HEADER, token);
        }

        let response = request
            .send()
            .await
            .context("failed to send HTTP request")?;

        if !response.status().is_success() {
            anyhow::bail!("HTTP error: {}", response.status());
        }

        let body = response
            .text()
            .await
            .context("failed to read response body")?;

        let mut metric: Metric =
            serde_json::from_str(&body).context("failed to parse metrics JSON")?;

        // Agents that do not know their id report under the configured one.
        if metric.agent_id.is_empty() {
            metric.agent_id = self.config.id.clone();
        }

        let event = StatEvent {
            agent_id: self.config.id.clone(),
            metric,
            received_at: Utc::now(),
        };

        match self.stat_tx.send(event) {
            Ok(receivers) => trace!("published stat event to {receivers} receivers"),
            Err(_) => trace!("no receivers for stat event"),
        }

        Ok(())
    }
}

/// Handle for controlling a CollectorActor
#[derive(Clone)]
pub struct CollectorHandle {
    sender: mpsc::Sender<CollectorCommand>,
    pub agent_id: String,
}

impl CollectorHandle {
    pub fn spawn(config: ResolvedAgentConfig, stat_tx: broadcast::Sender<StatEvent>) -> Result<Self> {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let agent_id = config.id.clone();

        let actor = CollectorActor::new(config, cmd_rx, stat_tx)?;
        tokio::spawn(actor.run());

        Ok(Self {
            sender: cmd_tx,
            agent_id,
        })
    }

    /// Poll immediately, bypassing the interval timer
    pub async fn poll_now(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CollectorCommand::PollNow { respond_to: tx })
            .await
            .context("failed to send PollNow command")?;

        rx.await.context("failed to receive response")??;
        Ok(())
    }

    pub async fn update_interval(&self, interval_secs: u64) -> Result<()> {
        self.sender
            .send(CollectorCommand::UpdateInterval { interval_secs })
            .await
            .context("failed to send UpdateInterval command")?;
        Ok(())
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(CollectorCommand::Shutdown)
            .await
            .context("failed to send Shutdown command")?;
        Ok(())
    }
}

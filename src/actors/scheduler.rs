//! SchedulerActor - runs one configured check on its interval
//!
//! ```text
//! Timer tick → Probe::execute → snapshot → Publish CheckEvent → [IncidentActor, StorageActor]
//!     ↑
//!     └─── Commands (CheckNow, UpdateInterval, Shutdown)
//! ```

use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, instrument, trace, warn};

use crate::{
    config::ResolvedCheckConfig,
    convert::snapshot_from_probe,
    probes::{Probe, ProbeResult, build_probe},
};

use super::messages::{CheckEvent, SchedulerCommand};

/// Actor that executes a single check
pub struct SchedulerActor {
    check_id: String,
    rule: String,
    probe: Box<dyn Probe>,
    command_rx: mpsc::Receiver<SchedulerCommand>,
    event_tx: broadcast::Sender<CheckEvent>,
    interval_duration: Duration,
}

impl SchedulerActor {
    pub fn new(
        config: &ResolvedCheckConfig,
        probe: Box<dyn Probe>,
        command_rx: mpsc::Receiver<SchedulerCommand>,
        event_tx: broadcast::Sender<CheckEvent>,
    ) -> Self {
        Self {
            check_id: config.id.clone(),
            rule: config.rule.clone(),
            probe,
            command_rx,
            event_tx,
            interval_duration: config.interval,
        }
    }

    #[instrument(skip(self), fields(check = %self.check_id))]
    pub async fn run(mut self) {
        debug!("starting scheduler actor");

        let mut ticker = interval(self.interval_duration);
        // A probe slower than its interval must not cause a burst of catch-up runs.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_check().await;
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        SchedulerCommand::CheckNow { respond_to } => {
                            debug!("received CheckNow command");
                            let result = self.run_check().await;
                            let _ = respond_to.send(result);
                        }

                        SchedulerCommand::UpdateInterval { interval_secs } => {
                            debug!("updating interval to {interval_secs}s");
                            self.interval_duration = Duration::from_secs(interval_secs.max(1));
                            ticker = interval(self.interval_duration);
                            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                        }

                        SchedulerCommand::Shutdown => {
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

        debug!("scheduler actor stopped");
    }

    async fn run_check(&self) -> ProbeResult {
        trace!("checking {}", self.probe.location());
        let result = self.probe.execute().await;

        let event = CheckEvent {
            check_id: self.check_id.clone(),
            rule: self.rule.clone(),
            response: snapshot_from_probe(&self.check_id, &result),
            result: result.clone(),
        };

        // No subscribers is not an error: the hub may run without storage.
        if self.event_tx.send(event).is_err() {
            trace!("no subscribers for check event");
        }
        result
    }
}

/// Handle for controlling a SchedulerActor
#[derive(Clone)]
pub struct SchedulerHandle {
    sender: mpsc::Sender<SchedulerCommand>,
    check_id: String,
}

impl SchedulerHandle {
    /// Build the check's probe and spawn its actor
    pub fn spawn(
        config: &ResolvedCheckConfig,
        event_tx: broadcast::Sender<CheckEvent>,
    ) -> Result<Self> {
        let probe = build_probe(config).with_context(|| format!("check {}", config.id))?;
        Ok(Self::spawn_with_probe(config, probe, event_tx))
    }

    /// Spawn an actor around an already built probe
    pub fn spawn_with_probe(
        config: &ResolvedCheckConfig,
        probe: Box<dyn Probe>,
        event_tx: broadcast::Sender<CheckEvent>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let actor = SchedulerActor::new(config, probe, cmd_rx, event_tx);
        tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            check_id: config.id.clone(),
        }
    }

    pub async fn check_now(&self) -> Result<ProbeResult> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::CheckNow { respond_to: tx })
            .await
            .context("scheduler actor is gone")?;

        rx.await.context("scheduler actor dropped the request")
    }

    pub async fn update_interval(&self, interval_secs: u64) -> Result<()> {
        self.sender
            .send(SchedulerCommand::UpdateInterval { interval_secs })
            .await?;
        Ok(())
    }

    pub async fn shutdown(self) {
        let _ = self.sender.send(SchedulerCommand::Shutdown).await;
    }

    pub fn check_id(&self) -> &str {
        &self.check_id
    }
}

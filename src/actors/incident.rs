//! IncidentActor - turns check results into incident transitions
//!
//! ```text
//! CheckEvent → IncidentEngine::observe_result → Publish IncidentEvent → [StorageActor]
//! ```
//!
//! The engine itself lives behind an `Arc` so the hub can seed it with
//! restored incidents before the actor starts and tests can inspect it.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, instrument, trace, warn};

use crate::{
    incidents::{IncidentEngine, Transition},
    probes::ProbeResult,
};

use super::messages::{CheckEvent, IncidentCommand, IncidentEvent};

pub struct IncidentActor {
    engine: Arc<IncidentEngine>,
    command_rx: mpsc::Receiver<IncidentCommand>,
    check_rx: broadcast::Receiver<CheckEvent>,
    incident_tx: broadcast::Sender<IncidentEvent>,
}

impl IncidentActor {
    pub fn new(
        engine: Arc<IncidentEngine>,
        command_rx: mpsc::Receiver<IncidentCommand>,
        check_rx: broadcast::Receiver<CheckEvent>,
        incident_tx: broadcast::Sender<IncidentEvent>,
    ) -> Self {
        Self {
            engine,
            command_rx,
            check_rx,
            incident_tx,
        }
    }

    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting incident actor");

        loop {
            tokio::select! {
                result = self.check_rx.recv() => {
                    match result {
                        Ok(event) => {
                            self.observe(&event.rule, &event.result).await;
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("incident actor lagged, skipped {skipped} check results");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("check channel closed, shutting down");
                            break;
                        }
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        IncidentCommand::Observe { rule, result, respond_to } => {
                            let transition = self.observe(&rule, &result).await;
                            let _ = respond_to.send(transition);
                        }

                        IncidentCommand::Shutdown => {
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

        debug!("incident actor stopped");
    }

    async fn observe(&self, rule: &str, result: &ProbeResult) -> Transition {
        let transition = self.engine.observe_result(rule, result).await;
        if transition == Transition::Unchanged {
            return transition;
        }

        let event = IncidentEvent {
            rule: rule.to_string(),
            transition: transition.clone(),
        };
        if self.incident_tx.send(event).is_err() {
            trace!("no subscribers for incident event");
        }
        transition
    }
}

/// Handle for controlling the IncidentActor
#[derive(Clone)]
pub struct IncidentHandle {
    sender: mpsc::Sender<IncidentCommand>,
    engine: Arc<IncidentEngine>,
}

impl IncidentHandle {
    pub fn spawn(
        engine: Arc<IncidentEngine>,
        check_rx: broadcast::Receiver<CheckEvent>,
        incident_tx: broadcast::Sender<IncidentEvent>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let actor = IncidentActor::new(engine.clone(), cmd_rx, check_rx, incident_tx);
        tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            engine,
        }
    }

    pub async fn observe(&self, rule: &str, result: ProbeResult) -> Result<Transition> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(IncidentCommand::Observe {
                rule: rule.to_string(),
                result,
                respond_to: tx,
            })
            .await
            .context("incident actor is gone")?;

        rx.await.context("incident actor dropped the request")
    }

    pub fn engine(&self) -> &Arc<IncidentEngine> {
        &self.engine
    }

    pub async fn shutdown(&self) {
        let _ = self.sender.send(IncidentCommand::Shutdown).await;
    }
}

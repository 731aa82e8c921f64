//! StorageActor - persists snapshots, incidents and agent stats
//!
//! ## Write paths
//!
//! - **Snapshots and incidents** are point writes, one upsert per event.
//! - **Stats** accumulate in a [`StatBatch`] and are written as one
//!   transaction when either trigger fires:
//!   - **Size trigger**: the batch reaches the configured size (default 100)
//!   - **Time trigger**: the flush interval elapses (default 5 seconds)
//!
//! ## Failure policy
//!
//! Non-fatal write errors are logged and counted; stats of a failed flush
//! go back into the batch (bounded) for the next attempt. A fatal error (closed
//! backend, lost connection, bad configuration) stops the actor: pending
//! stats are put back into the batch and the loop exits loudly rather than
//! silently discarding further writes.
//!
//! Reads do not go through the actor: [`StorageHandle::service`] hands out the
//! shared [`StorageService`] directly.

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time;
use tracing::{debug, error, info, instrument, trace, warn};

use super::messages::{CheckEvent, IncidentEvent, StatEvent, StorageCommand, StorageStats};
use crate::{
    config::{ResolvedBatchConfig, ResolvedStorageConfig},
    convert,
    storage::{StatBatch, StorageBackend, StorageError, StorageService, schema::StatRow},
    util::now_nanos,
};

/// Cleanup interval - run retention cleanup daily
const CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Failed flushes are retried until the batch holds this many batches
const MAX_RETAINED_BATCHES: usize = 10;

/// Subscriptions the storage actor consumes
pub struct StorageInputs {
    pub check_rx: broadcast::Receiver<CheckEvent>,
    pub stat_rx: broadcast::Receiver<StatEvent>,
    pub incident_rx: broadcast::Receiver<IncidentEvent>,
}

pub struct StorageActor {
    service: StorageService,
    batch: Arc<StatBatch>,
    batch_size: usize,
    flush_interval: Duration,

    /// `None` disables retention cleanup
    retention: Option<ResolvedStorageConfig>,

    command_rx: mpsc::Receiver<StorageCommand>,
    inputs: StorageInputs,

    stats: StorageStats,

    /// Set once a fatal error was seen; the loop exits on the next turn
    failed: bool,
}

impl StorageActor {
    pub fn new(
        service: StorageService,
        batch_config: &ResolvedBatchConfig,
        retention: Option<ResolvedStorageConfig>,
        command_rx: mpsc::Receiver<StorageCommand>,
        inputs: StorageInputs,
    ) -> Self {
        if let Some(retention) = &retention {
            debug!("retention cleanup enabled: {} days", retention.retention_days);
        }

        Self {
            service,
            batch: Arc::new(StatBatch::with_capacity(batch_config.size)),
            batch_size: batch_config.size,
            flush_interval: batch_config.flush_interval,
            retention,
            command_rx,
            inputs,
            stats: StorageStats::default(),
            failed: false,
        }
    }

    fn backend(&self) -> &Arc<dyn StorageBackend> {
        self.service.backend()
    }

    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!("starting storage actor");

        let mut flush_interval = time::interval(self.flush_interval);
        let mut cleanup_interval = time::interval(CLEANUP_INTERVAL);
        let has_retention = self.retention.is_some();
        let mut shutdown_ack: Option<oneshot::Sender<()>> = None;
        let mut stat_open = true;
        let mut incident_open = true;

        // Both intervals fire immediately; that first tick doubles as the
        // startup cleanup.
        while !self.failed {
            tokio::select! {
                result = self.inputs.check_rx.recv() => {
                    match result {
                        Ok(event) => self.store_snapshot(event).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("storage actor lagged, skipped {skipped} check results");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("check channel closed, shutting down");
                            break;
                        }
                    }
                }

                result = self.inputs.stat_rx.recv(), if stat_open => {
                    match result {
                        Ok(event) => self.store_stat(event).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("storage actor lagged, skipped {skipped} stat reports");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            trace!("stat channel closed");
                            stat_open = false;
                        }
                    }
                }

                result = self.inputs.incident_rx.recv(), if incident_open => {
                    match result {
                        Ok(event) => self.store_incident(event).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            // Lost transitions are repaired by the next one for the rule.
                            warn!("storage actor lagged, skipped {skipped} incident events");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            trace!("incident channel closed");
                            incident_open = false;
                        }
                    }
                }

                _ = flush_interval.tick() => {
                    if !self.batch.is_empty() {
                        trace!("time-based flush triggered ({} stats)", self.batch.len());
                        let _ = self.flush_batch().await;
                    }
                }

                _ = cleanup_interval.tick(), if has_retention => {
                    debug!("retention cleanup triggered");
                    let _ = self.run_cleanup().await;
                }

                Some(cmd) = self.command_rx.recv() => {
                    if let StorageCommand::Shutdown { respond_to } = cmd {
                        debug!("received shutdown command");
                        shutdown_ack = Some(respond_to);
                        break;
                    }
                    self.handle_command(cmd).await;
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        if self.failed {
            error!(
                pending = self.batch.len(),
                "storage actor stopped after a fatal backend error"
            );
        } else if !self.batch.is_empty() {
            debug!("final flush before shutdown ({} stats)", self.batch.len());
            let _ = self.flush_batch().await;
        }

        debug!("closing backend");
        if let Err(e) = self.backend().close().await {
            error!("error closing backend: {}", e);
        }

        if let Some(ack) = shutdown_ack {
            let _ = ack.send(());
        }
        debug!("storage actor stopped");
    }

    fn record_error(&mut self, what: &str, fatal: bool, err: &dyn std::fmt::Display) {
        self.stats.write_errors += 1;
        if fatal {
            error!("fatal storage error while {what}: {err}");
            self.failed = true;
        } else {
            error!("failed {what}: {err}");
        }
    }

    async fn store_snapshot(&mut self, event: CheckEvent) {
        trace!("storing snapshot for {}", event.check_id);
        match self.service.save_response(&event.response).await {
            Ok(()) => self.stats.snapshots_written += 1,
            Err(e) => self.record_error("storing snapshot", e.is_fatal(), &e),
        }
    }

    async fn store_incident(&mut self, event: IncidentEvent) {
        let Some(incident) = event.transition.incident() else {
            return;
        };
        trace!("storing incident {} for rule {}", incident.id, event.rule);
        match self.service.save_incident(incident).await {
            Ok(()) => self.stats.incidents_written += 1,
            Err(e) => self.record_error("storing incident", e.is_fatal(), &e),
        }
    }

    async fn store_stat(&mut self, event: StatEvent) {
        let row = match convert::to_stat_row(&event.metric) {
            Ok(row) => row,
            Err(e) => {
                warn!(agent = %event.agent_id, "dropping malformed stat report: {e}");
                return;
            }
        };

        if self.batch.push(row) >= self.batch_size {
            trace!("size-based flush triggered ({} stats)", self.batch.len());
            let _ = self.flush_batch().await;
        }
    }

    /// Write the whole batch in one transaction
    async fn flush_batch(&mut self) -> Result<usize, StorageError> {
        let rows = self.batch.take();
        if rows.is_empty() {
            return Ok(0);
        }
        let count = rows.len();
        debug!("flushing {} stats to backend", count);

        // Keep a copy so a fatal failure can hand the rows back to the batch.
        match self.backend().insert_stats(rows.clone()).await {
            Ok(()) => {
                self.stats.flush_count += 1;
                self.stats.stats_written += count as u64;
                trace!("flush #{} complete ({} stats)", self.stats.flush_count, count);
                Ok(count)
            }
            Err(e) => {
                let fatal = e.is_fatal();
                self.record_error("flushing stat batch", fatal, &e);
                self.requeue(rows, fatal);
                Err(e)
            }
        }
    }

    /// Hand rows of a failed flush back to the batch.
    ///
    /// After a fatal error everything is kept for the final stats read. A
    /// transient failure is retried with the next flush as long as the batch
    /// stays under `MAX_RETAINED_BATCHES` worth of rows; the rest is dropped.
    fn requeue(&mut self, rows: Vec<StatRow>, fatal: bool) {
        let room = if fatal {
            rows.len()
        } else {
            (self.batch_size * MAX_RETAINED_BATCHES).saturating_sub(self.batch.len())
        };

        let dropped = rows.len().saturating_sub(room);
        for row in rows.into_iter().take(room) {
            self.batch.push(row);
        }
        if dropped > 0 {
            self.stats.stats_dropped += dropped as u64;
            warn!("stat batch is full, dropped {dropped} stats after a failed flush");
        }
    }

    async fn run_cleanup(&mut self) -> Result<u64, StorageError> {
        let Some(retention) = &self.retention else {
            return Ok(0);
        };
        let cutoff = retention.retention_cutoff(now_nanos());
        debug!("running retention cleanup (deleting data before {})", cutoff);

        match self.backend().cleanup_before(cutoff).await {
            Ok(report) => {
                let total = report.total();
                if total > 0 {
                    info!(
                        snapshots = report.snapshots,
                        stats = report.stats,
                        incidents = report.incidents,
                        transactions = report.transactions,
                        "retention cleanup deleted {total} records"
                    );
                } else {
                    trace!("retention cleanup: nothing to delete");
                }
                self.stats.total_deleted += total;
                self.stats.last_cleanup_time = Some(Utc::now());
                Ok(total)
            }
            Err(e) => {
                // Cleanup is retried on the next interval unless the backend is gone.
                self.record_error("running retention cleanup", e.is_fatal(), &e);
                Err(e)
            }
        }
    }

    async fn handle_command(&mut self, cmd: StorageCommand) {
        match cmd {
            StorageCommand::Flush { respond_to } => {
                debug!("manual flush requested");
                let result = self.flush_batch().await.map_err(anyhow::Error::from);
                let _ = respond_to.send(result);
            }

            StorageCommand::Cleanup { respond_to } => {
                let result = self.run_cleanup().await.map_err(anyhow::Error::from);
                let _ = respond_to.send(result);
            }

            StorageCommand::GetStats { respond_to } => {
                let mut stats = self.stats.clone();
                stats.pending_stats = self.batch.len();
                let _ = respond_to.send(stats);
            }

            // Handled by the loop so the final flush happens after it exits.
            StorageCommand::Shutdown { respond_to } => {
                let _ = respond_to.send(());
            }
        }
    }
}

/// Handle for controlling the StorageActor
#[derive(Clone)]
pub struct StorageHandle {
    sender: mpsc::Sender<StorageCommand>,
    service: StorageService,
}

impl StorageHandle {
    pub fn spawn(
        backend: Arc<dyn StorageBackend>,
        batch_config: &ResolvedBatchConfig,
        retention: Option<ResolvedStorageConfig>,
        inputs: StorageInputs,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let service = StorageService::new(backend);

        let actor = StorageActor::new(service.clone(), batch_config, retention, cmd_rx, inputs);
        tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            service,
        }
    }

    /// Read/write surface over the same backend
    pub fn service(&self) -> &StorageService {
        &self.service
    }

    pub async fn flush(&self) -> anyhow::Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(StorageCommand::Flush { respond_to: tx })
            .await
            .context("storage actor is gone")?;

        rx.await?
    }

    pub async fn cleanup(&self) -> anyhow::Result<u64> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(StorageCommand::Cleanup { respond_to: tx })
            .await
            .context("storage actor is gone")?;

        rx.await?
    }

    pub async fn get_stats(&self) -> Option<StorageStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(StorageCommand::GetStats { respond_to: tx })
            .await
            .ok()?;

        rx.await.ok()
    }

    /// Stop the actor and wait until the final flush and backend close are done
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(StorageCommand::Shutdown { respond_to: tx })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    /// Whether the actor is still accepting commands
    pub fn is_running(&self) -> bool {
        !self.sender.is_closed()
    }
}

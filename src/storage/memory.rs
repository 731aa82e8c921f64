//! In-memory storage backend (no persistence)
//!
//! This backend keeps every record in process memory. It's useful for:
//! - Testing without database dependencies
//! - Deployments that only need live incident tracking
//!
//! It answers queries with the shared helpers in [`super::query`], so its
//! filter/sort/paginate behaviour is the reference the SQL backend matches.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::backend::{HealthStatus, StorageBackend};
use super::error::{StorageError, StorageResult};
use super::query::{
    IncidentQuery, Paged, SnapshotQuery, StatQuery, TimeRange, TransactionQuery, apply_direction,
    paginate, sort_transactions,
};
use super::schema::{
    AgentRow, CleanupReport, IncidentRow, SnapshotRow, StatRow, TransactionRow, UptimeResult,
};
use crate::wire::{IncidentStatus, SchedulerCode};

#[derive(Default)]
struct State {
    /// Keyed by `(scheduler_id, meta_start_time)`
    snapshots: BTreeMap<(String, i64), SnapshotRow>,
    /// Keyed by `(agent_id, time)`
    stats: BTreeMap<(String, i64), StatRow>,
    incidents: HashMap<String, IncidentRow>,
    transactions: HashMap<String, TransactionRow>,
}

/// In-memory storage backend
pub struct MemoryBackend {
    state: RwLock<State>,
    closed: AtomicBool,
}

impl MemoryBackend {
    /// Create a new in-memory backend
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn insert_snapshot(&self, row: SnapshotRow) -> StorageResult<()> {
        self.ensure_open()?;
        let key = (row.scheduler_id.clone(), row.meta_start_time);
        self.state.write().await.snapshots.insert(key, row);
        Ok(())
    }

    async fn query_snapshots(&self, query: SnapshotQuery) -> StorageResult<Paged<SnapshotRow>> {
        self.ensure_open()?;
        let state = self.state.read().await;

        let mut rows: Vec<SnapshotRow> = state
            .snapshots
            .range((query.scheduler_id.clone(), i64::MIN)..=(query.scheduler_id.clone(), i64::MAX))
            .map(|(_, row)| row)
            .filter(|row| query.range.contains(row.meta_start_time))
            .filter(|row| query.code.is_none_or(|code| code == row.code))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            apply_direction(a.meta_start_time.cmp(&b.meta_start_time), query.direction)
        });

        Ok(paginate(rows, query.pagination))
    }

    async fn uptime(&self, scheduler_id: &str, range: TimeRange) -> StorageResult<UptimeResult> {
        self.ensure_open()?;
        let state = self.state.read().await;

        let mut count = 0;
        let mut total = 0;
        let mut latency_sum: i128 = 0;
        for row in state
            .snapshots
            .values()
            .filter(|row| row.scheduler_id == scheduler_id && range.contains(row.meta_start_time))
        {
            total += 1;
            if row.code == SchedulerCode::Ok {
                count += 1;
            }
            latency_sum += i128::from(row.latency());
        }

        let latency = if total == 0 {
            String::new()
        } else {
            (latency_sum as f64 / total as f64).to_string()
        };

        Ok(UptimeResult {
            count,
            total,
            latency,
        })
    }

    async fn insert_stats(&self, rows: Vec<StatRow>) -> StorageResult<()> {
        self.ensure_open()?;
        if rows.is_empty() {
            return Ok(());
        }

        debug!("inserting {} stats into memory", rows.len());
        let mut state = self.state.write().await;
        for row in rows {
            state.stats.insert((row.agent_id.clone(), row.time), row);
        }
        Ok(())
    }

    async fn query_stats(&self, query: StatQuery) -> StorageResult<Paged<StatRow>> {
        self.ensure_open()?;
        if query.range.is_empty() {
            return Ok(paginate(Vec::new(), query.pagination));
        }
        let state = self.state.read().await;

        let mut rows: Vec<StatRow> = state
            .stats
            .range((query.agent_id.clone(), query.range.from)..=(query.agent_id.clone(), query.range.to))
            .map(|(_, row)| row.clone())
            .collect();
        rows.reverse();

        Ok(paginate(rows, query.pagination))
    }

    async fn list_agents(&self) -> StorageResult<Vec<AgentRow>> {
        self.ensure_open()?;
        let state = self.state.read().await;

        // Rows are ordered by (agent, time), so the last one per agent wins.
        let mut agents: BTreeMap<&str, &str> = BTreeMap::new();
        for row in state.stats.values() {
            agents.insert(&row.agent_id, &row.agent_name);
        }

        Ok(agents
            .into_iter()
            .map(|(id, name)| AgentRow {
                agent_id: id.to_string(),
                agent_name: name.to_string(),
            })
            .collect())
    }

    async fn upsert_incident(&self, row: IncidentRow) -> StorageResult<()> {
        self.ensure_open()?;
        self.state
            .write()
            .await
            .incidents
            .insert(row.incident_id.clone(), row);
        Ok(())
    }

    async fn get_incident(&self, incident_id: &str) -> StorageResult<Option<IncidentRow>> {
        self.ensure_open()?;
        Ok(self.state.read().await.incidents.get(incident_id).cloned())
    }

    async fn get_active_incident_by_rule_id(
        &self,
        rule_id: &str,
    ) -> StorageResult<Option<IncidentRow>> {
        self.ensure_open()?;
        let state = self.state.read().await;
        Ok(state
            .incidents
            .values()
            .filter(|row| row.rule_id == rule_id && row.status == IncidentStatus::Opened)
            .max_by_key(|row| row.start_time)
            .cloned())
    }

    async fn list_active_incidents(&self) -> StorageResult<Vec<IncidentRow>> {
        self.ensure_open()?;
        let state = self.state.read().await;
        let mut rows: Vec<IncidentRow> = state
            .incidents
            .values()
            .filter(|row| row.status == IncidentStatus::Opened)
            .cloned()
            .collect();
        rows.sort_by_key(|row| row.start_time);
        Ok(rows)
    }

    async fn query_incidents(&self, query: IncidentQuery) -> StorageResult<Paged<IncidentRow>> {
        self.ensure_open()?;
        let state = self.state.read().await;

        let mut rows: Vec<IncidentRow> = state
            .incidents
            .values()
            .filter(|row| query.rule_id.as_deref().is_none_or(|r| r == row.rule_id))
            .filter(|row| query.status.is_none_or(|s| s == row.status))
            .filter(|row| query.range.is_none_or(|r| r.contains(row.start_time)))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.start_time
                .cmp(&a.start_time)
                .then_with(|| a.incident_id.cmp(&b.incident_id))
        });

        Ok(paginate(rows, query.pagination))
    }

    async fn insert_transaction(&self, row: TransactionRow) -> StorageResult<()> {
        self.ensure_open()?;
        self.state
            .write()
            .await
            .transactions
            .insert(row.transaction_id.clone(), row);
        Ok(())
    }

    async fn get_transaction(&self, transaction_id: &str) -> StorageResult<Option<TransactionRow>> {
        self.ensure_open()?;
        Ok(self
            .state
            .read()
            .await
            .transactions
            .get(transaction_id)
            .cloned())
    }

    async fn application_transactions(
        &self,
        application_id: &str,
    ) -> StorageResult<Vec<TransactionRow>> {
        self.ensure_open()?;
        let state = self.state.read().await;
        Ok(state
            .transactions
            .values()
            .filter(|row| row.application_id == application_id)
            .cloned()
            .collect())
    }

    async fn query_transactions(
        &self,
        query: TransactionQuery,
    ) -> StorageResult<Paged<TransactionRow>> {
        self.ensure_open()?;
        let state = self.state.read().await;

        let mut rows: Vec<TransactionRow> = state
            .transactions
            .values()
            .filter(|row| query.filter.matches(row))
            .cloned()
            .collect();
        sort_transactions(&mut rows, query.sort);

        Ok(paginate(rows, query.pagination))
    }

    async fn cleanup_before(&self, cutoff: i64) -> StorageResult<CleanupReport> {
        self.ensure_open()?;
        let mut state = self.state.write().await;
        let mut report = CleanupReport::default();

        let before = state.snapshots.len();
        state.snapshots.retain(|_, row| row.meta_start_time >= cutoff);
        report.snapshots = (before - state.snapshots.len()) as u64;

        let before = state.stats.len();
        state.stats.retain(|_, row| row.time >= cutoff);
        report.stats = (before - state.stats.len()) as u64;

        let before = state.incidents.len();
        state
            .incidents
            .retain(|_, row| row.status == IncidentStatus::Opened || row.end_time >= cutoff);
        report.incidents = (before - state.incidents.len()) as u64;

        let before = state.transactions.len();
        state.transactions.retain(|_, row| row.start_time >= cutoff);
        report.transactions = (before - state.transactions.len()) as u64;

        debug!("memory cleanup removed {} records", report.total());
        Ok(report)
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let closed = self.closed.load(Ordering::Acquire);
        let state = self.state.read().await;
        Ok(HealthStatus {
            healthy: !closed,
            message: if closed {
                "In-memory storage closed".to_string()
            } else {
                "In-memory storage operational".to_string()
            },
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                ("snapshots".to_string(), state.snapshots.len().to_string()),
                ("stats".to_string(), state.stats.len().to_string()),
            ]),
        })
    }

    async fn get_stats(&self) -> StorageResult<String> {
        let state = self.state.read().await;
        Ok(format!(
            "In-Memory: {} snapshots, {} stats, {} incidents, {} transactions",
            state.snapshots.len(),
            state.stats.len(),
            state.incidents.len(),
            state.transactions.len()
        ))
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory backend");
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

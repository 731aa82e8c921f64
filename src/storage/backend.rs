//! Storage backend trait definition
//!
//! This module defines the core `StorageBackend` trait that all
//! storage implementations must implement.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;

use super::error::StorageResult;
use super::query::{
    GroupQuery, IncidentQuery, Paged, SnapshotQuery, StatQuery, TimeRange, TransactionQuery,
    group_transactions,
};
use super::schema::{
    AgentRow, CleanupReport, GroupResult, IncidentRow, SnapshotRow, StatRow, TransactionRow,
    UptimeResult,
};
use super::tree::collect_descendants;

/// Health status of the storage backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: HashMap<String, String>,
}

/// Trait for persistent storage backends
///
/// The trait is designed to be:
///
/// - **Async**: All methods are async for compatibility with Tokio
/// - **Upsert-based**: point writes are keyed by natural id, so replaying an
///   event never duplicates a record
/// - **Batch-aware**: `insert_stats` writes a whole [`StatBatch`] drain in one
///   transaction; either every row lands or none does
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync`; a single backend is shared by the
/// storage actor (writes) and any number of concurrent readers.
///
/// ## Lifecycle
///
/// After [`close`](StorageBackend::close) every operation fails with
/// [`StorageError::Closed`], which [`StorageError::is_fatal`] reports as fatal.
///
/// [`StatBatch`]: super::batch::StatBatch
/// [`StorageError::Closed`]: super::error::StorageError::Closed
/// [`StorageError::is_fatal`]: super::error::StorageError::is_fatal
#[async_trait]
pub trait StorageBackend: Send + Sync {
    // ========================================================================
    // Snapshots
    // ========================================================================

    /// Insert or replace the snapshot keyed by `(scheduler_id, meta_start_time)`
    async fn insert_snapshot(&self, row: SnapshotRow) -> StorageResult<()>;

    /// Snapshots of one scheduler in a time window
    async fn query_snapshots(&self, query: SnapshotQuery) -> StorageResult<Paged<SnapshotRow>>;

    /// Successful/total check counts and mean latency for one scheduler
    async fn uptime(&self, scheduler_id: &str, range: TimeRange) -> StorageResult<UptimeResult>;

    // ========================================================================
    // Agent statistics
    // ========================================================================

    /// Write a batch of stat rows atomically
    ///
    /// Fails with `Closed` on a closed backend even when `rows` is empty.
    async fn insert_stats(&self, rows: Vec<StatRow>) -> StorageResult<()>;

    async fn query_stats(&self, query: StatQuery) -> StorageResult<Paged<StatRow>>;

    /// Every agent that ever reported, with its most recent name
    async fn list_agents(&self) -> StorageResult<Vec<AgentRow>>;

    // ========================================================================
    // Incidents
    // ========================================================================

    async fn upsert_incident(&self, row: IncidentRow) -> StorageResult<()>;

    async fn get_incident(&self, incident_id: &str) -> StorageResult<Option<IncidentRow>>;

    /// The open incident for a rule, if any
    async fn get_active_incident_by_rule_id(
        &self,
        rule_id: &str,
    ) -> StorageResult<Option<IncidentRow>>;

    /// Every open incident, used to seed the incident engine at startup
    async fn list_active_incidents(&self) -> StorageResult<Vec<IncidentRow>>;

    async fn query_incidents(&self, query: IncidentQuery) -> StorageResult<Paged<IncidentRow>>;

    // ========================================================================
    // Transactions
    // ========================================================================

    async fn insert_transaction(&self, row: TransactionRow) -> StorageResult<()>;

    async fn get_transaction(&self, transaction_id: &str) -> StorageResult<Option<TransactionRow>>;

    /// Every transaction recorded for one application
    async fn application_transactions(
        &self,
        application_id: &str,
    ) -> StorageResult<Vec<TransactionRow>>;

    async fn query_transactions(
        &self,
        query: TransactionQuery,
    ) -> StorageResult<Paged<TransactionRow>>;

    /// A transaction and all of its descendants within its application
    ///
    /// Cycles in the stored parent links are cut, never reported as errors.
    async fn transaction_with_descendants(
        &self,
        transaction_id: &str,
    ) -> StorageResult<Option<(TransactionRow, Vec<TransactionRow>)>> {
        let Some(root) = self.get_transaction(transaction_id).await? else {
            return Ok(None);
        };
        let rows = self.application_transactions(&root.application_id).await?;
        let children = collect_descendants(&root.transaction_id, &rows);
        Ok(Some((root, children)))
    }

    /// Aggregate statistics of the filtered transactions, keyed by group
    async fn group_transactions(
        &self,
        query: GroupQuery,
    ) -> StorageResult<BTreeMap<String, GroupResult>> {
        let rows = self
            .query_transactions(TransactionQuery {
                filter: query.filter,
                sort: Default::default(),
                pagination: None,
            })
            .await?;
        Ok(group_transactions(&rows.items, query.key))
    }

    // ========================================================================
    // Maintenance
    // ========================================================================

    /// Delete snapshots, stats, closed incidents and transactions older
    /// than `cutoff` (nanoseconds since epoch)
    async fn cleanup_before(&self, cutoff: i64) -> StorageResult<CleanupReport>;

    /// Check backend health
    ///
    /// Performs a lightweight operation to verify the backend
    /// is operational (e.g., ping database, check file access).
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Human-readable stats about the backend
    async fn get_stats(&self) -> StorageResult<String>;

    /// Close the backend and release resources
    ///
    /// Waits for in-flight operations to give back their connections.
    async fn close(&self) -> StorageResult<()>;
}

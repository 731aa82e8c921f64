//! Persisted record shapes
//!
//! All timestamps are stored as signed nanoseconds since the Unix epoch.
//!
//! As with the rest of the storage layer, the layout is **hybrid**:
//! fields that are filtered or aggregated on (ids, codes, times) are typed
//! columns, while nested telemetry (CPU cores, disks, interfaces, incident
//! history, the check meta value) travels as JSON so that its shape can grow
//! without migrations.

use serde::{Deserialize, Serialize};

use crate::wire::{IncidentStatus, SchedulerCode, SchedulerType, TransactionStatus, TransactionType};

/// Persisted outcome of one scheduled check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub scheduler_id: String,
    pub code: SchedulerCode,
    pub check_type: SchedulerType,
    pub error: Option<String>,
    pub meta_start_time: i64,
    pub meta_end_time: i64,
    /// Serialized JSON meta value, empty when absent or not encodable
    pub meta_value: Vec<u8>,
}

impl SnapshotRow {
    pub fn latency(&self) -> i64 {
        self.meta_end_time.saturating_sub(self.meta_start_time)
    }
}

/// Persisted incident with its full history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentRow {
    pub incident_id: String,
    pub rule_id: String,
    pub status: IncidentStatus,
    /// Smallest history timestamp
    pub start_time: i64,
    /// Largest history timestamp
    pub end_time: i64,
    pub histories: Vec<IncidentHistoryRow>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentHistoryRow {
    pub status: IncidentStatus,
    pub timestamp: i64,
}

/// One statistics report from an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatRow {
    pub agent_id: String,
    pub agent_name: String,
    pub time: i64,
    /// Per-core load; empty when the report carried no CPU section
    pub cpus: Vec<CpuRow>,
    pub memory: Option<MemoryRow>,
    pub disks: Vec<DiskRow>,
    pub nets: Vec<NetRow>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CpuRow {
    pub load: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRow {
    pub mem: Option<MemoryUsageRow>,
    pub swap: Option<MemoryUsageRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryUsageRow {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub shared: u64,
    pub used_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskRow {
    pub name: String,
    pub total: u64,
    pub free: u64,
    pub used: u64,
    pub used_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetRow {
    pub name: String,
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    pub packets_sent: u64,
    pub packets_recv: u64,
    pub err_in: u64,
    pub err_out: u64,
    pub drop_in: u64,
    pub drop_out: u64,
}

/// One span of a distributed trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRow {
    pub transaction_id: String,
    pub application_id: String,
    /// Empty for roots
    pub parent_id: String,
    pub host: String,
    pub path: String,
    pub method: String,
    pub name: String,
    pub start_time: i64,
    pub end_time: i64,
    pub status: TransactionStatus,
    pub transaction_type: TransactionType,
    pub error: Option<String>,
}

impl TransactionRow {
    /// `end_time - start_time` in nanoseconds
    pub fn duration(&self) -> i64 {
        self.end_time.saturating_sub(self.start_time)
    }
}

/// Raw uptime aggregate for one scheduler
///
/// `latency` is the backend's textual rendering of the mean check latency,
/// e.g. `"1500000.5"`. Only the integral part is meaningful.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UptimeResult {
    /// Successful checks
    pub count: i64,
    /// All checks in the window
    pub total: i64,
    pub latency: String,
}

/// Aggregate statistics for one transaction group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupResult {
    pub name: String,
    pub count: i64,
    pub success_count: i64,
    pub average_time: f64,
    pub min_time: i64,
    pub max_time: i64,
    /// Earliest end time in the group
    pub low_time: i64,
}

/// Agent identity as recorded in its latest report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRow {
    pub agent_id: String,
    pub agent_name: String,
}

/// Rows removed by one retention pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub snapshots: u64,
    pub stats: u64,
    pub incidents: u64,
    pub transactions: u64,
}

impl CleanupReport {
    pub fn total(&self) -> u64 {
        self.snapshots + self.stats + self.incidents + self.transactions
    }
}

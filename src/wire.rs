//! Wire-level messages
//!
//! These are the shapes exchanged with schedulers, agents and tracing clients.
//! They mirror a protobuf-style contract serialized as JSON:
//!
//! - enums travel as integer codes (`0` means "unspecified")
//! - timestamps travel as `{ "seconds": .., "nanos": .. }`
//! - absent sub-messages are `null`/missing, never zero-filled
//!
//! Messages carry raw integer codes on purpose. Validating them into the
//! typed enums below happens at the converter boundary (`crate::convert`),
//! so a malformed status is a decoding failure and never reaches the
//! incident engine or the storage backends.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Declares a typed enum together with its integer wire code mapping.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($(#[$vmeta:meta])* $variant:ident = $code:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            /// Enum name used in decoding errors
            pub const NAME: &'static str = stringify!($name);

            /// Integer code used on the wire
            pub const fn code(self) -> i32 {
                match self {
                    $(Self::$variant => $code),+
                }
            }
        }

        impl TryFrom<i32> for $name {
            type Error = i32;

            fn try_from(code: i32) -> Result<Self, i32> {
                match code {
                    $($code => Ok(Self::$variant),)+
                    other => Err(other),
                }
            }
        }
    };
}

wire_enum! {
    /// Outcome of one scheduled check
    pub enum SchedulerCode {
        Ok = 1,
        Error = 2,
    }
}

wire_enum! {
    /// Protocol a scheduled check ran with
    pub enum SchedulerType {
        Tcp = 1,
        Grpc = 2,
        Http = 3,
        SiteMap = 4,
    }
}

wire_enum! {
    /// Lifecycle state of an incident (and of each history entry)
    pub enum IncidentStatus {
        Opened = 1,
        Closed = 2,
    }
}

wire_enum! {
    /// Outcome of a traced transaction
    pub enum TransactionStatus {
        Success = 1,
        Failed = 2,
    }
}

wire_enum! {
    /// Kind of a traced transaction
    pub enum TransactionType {
        XmlHttpRequest = 1,
        Fetch = 2,
        Websocket = 3,
        Http = 4,
        Grpc = 5,
        Db = 6,
        Internal = 7,
        Router = 8,
    }
}

wire_enum! {
    /// Sort key for transaction listings
    pub enum TransactionSortKey {
        Duration = 1,
        StartTime = 2,
        EndTime = 3,
    }
}

wire_enum! {
    /// Sort direction for listings
    pub enum SortDirection {
        Asc = 1,
        Desc = 2,
    }
}

wire_enum! {
    /// Column transaction statistics are grouped by
    pub enum GroupKey {
        Type = 1,
        Name = 2,
        Method = 3,
        Host = 4,
        Path = 5,
    }
}

// ============================================================================
// Common
// ============================================================================

/// Point in time as seconds and nanoseconds since the Unix epoch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanos: i32,
}

impl Timestamp {
    pub fn now() -> Self {
        Self::from_datetime(&Utc::now())
    }

    pub fn from_datetime(dt: &DateTime<Utc>) -> Self {
        Self {
            seconds: dt.timestamp(),
            nanos: dt.timestamp_subsec_nanos() as i32,
        }
    }
}

/// Inclusive time window used by every listing request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimeFilter {
    pub from: Option<Timestamp>,
    pub to: Option<Timestamp>,
}

/// Page request
///
/// `page` is 1-based; `-1` requests the last page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Pagination {
    pub page: i32,
    pub limit: i32,
}

impl Pagination {
    pub fn new(page: i32, limit: i32) -> Self {
        Self { page, limit }
    }

    /// Resolve this request against a total count into `(offset, limit)`.
    ///
    /// Both values are clamped so that `0 <= offset <= count` and
    /// `0 <= limit <= count - offset`.
    pub fn window(&self, count: i64) -> (i64, i64) {
        let count = count.max(0);
        let requested = i64::from(self.limit.max(0));

        let offset = if self.page == -1 {
            count - requested
        } else {
            i64::from(self.page.max(1) - 1).saturating_mul(requested)
        };
        let offset = offset.clamp(0, count);
        let limit = requested.min(count - offset);

        (offset, limit)
    }
}

// ============================================================================
// Snapshots
// ============================================================================

/// A scheduler reporting the outcome of one check execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchedulerResponse {
    pub scheduler_id: String,
    pub snapshot: Option<SchedulerSnapshot>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchedulerSnapshot {
    pub code: i32,
    #[serde(rename = "type")]
    pub check_type: i32,
    pub error: Option<SnapshotError>,
    pub meta: Option<SnapshotMeta>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SnapshotError {
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SnapshotMeta {
    pub start_time: Option<Timestamp>,
    pub end_time: Option<Timestamp>,
    /// Arbitrary structured payload describing the check
    pub value: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GetSchedulerInformationRequest {
    pub scheduler_id: String,
    pub time_range: Option<TimeFilter>,
    /// Optional [`SchedulerCode`] filter, `0` for any
    pub code: i32,
    /// [`SortDirection`] over the start time, `0` for descending
    pub direction: i32,
    pub pagination: Option<Pagination>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GetSchedulerInformationResponse {
    pub snapshots: Vec<SchedulerSnapshot>,
    pub count: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GetSchedulerUptimeRequest {
    pub scheduler_id: String,
    pub time_range: Option<TimeFilter>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GetSchedulerUptimeResponse {
    /// Share of successful checks, `0.0..=1.0`
    pub uptime: f64,
    /// Mean check latency in nanoseconds (whole part only)
    pub latency: f64,
}

// ============================================================================
// Incidents
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Incident {
    pub id: String,
    pub status: i32,
    pub rule_id: String,
    pub histories: Vec<IncidentHistoryItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IncidentHistoryItem {
    pub status: i32,
    pub timestamp: Option<Timestamp>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GetIncidentsListRequest {
    pub rule_id: Option<String>,
    /// Optional [`IncidentStatus`] filter, `0` for any
    pub status: i32,
    pub time_range: Option<TimeFilter>,
    pub pagination: Option<Pagination>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GetIncidentsListResponse {
    pub incidents: Vec<Incident>,
    pub count: i64,
}

// ============================================================================
// Agent statistics
// ============================================================================

/// One statistics report from an agent
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Metric {
    pub agent_id: String,
    pub agent_name: String,
    pub cpu_info: Option<CpuInfo>,
    pub memory_info: Option<MemoryInfo>,
    pub disk_info: Option<DiskInfo>,
    pub net_info: Option<NetInfo>,
    pub time: Option<Timestamp>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CpuInfo {
    pub cpus: Vec<CpuLoad>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CpuLoad {
    pub load: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemoryInfo {
    pub mem: Option<MemoryUsage>,
    pub swap: Option<MemoryUsage>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemoryUsage {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub shared: u64,
    pub used_percent: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiskInfo {
    pub disks: HashMap<String, DiskUsage>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DiskUsage {
    pub total: u64,
    pub free: u64,
    pub used: u64,
    pub used_percent: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetInfo {
    pub interfaces: HashMap<String, NetInterface>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetInterface {
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    pub packets_sent: u64,
    pub packets_recv: u64,
    pub err_in: u64,
    pub err_out: u64,
    pub drop_in: u64,
    pub drop_out: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GetAgentInformationRequest {
    pub agent_id: String,
    pub time_range: Option<TimeFilter>,
    pub pagination: Option<Pagination>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GetAgentInformationResponse {
    pub stats: Vec<Metric>,
    pub count: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentSummary {
    pub agent_id: String,
    pub agent_name: String,
}

// ============================================================================
// Transactions
// ============================================================================

/// One span of a distributed trace
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransactionInfo {
    pub id: String,
    pub application_id: String,
    /// Empty for root transactions
    pub parent_id: String,
    pub meta: Option<TransactionMeta>,
    pub name: String,
    pub start_time: Option<Timestamp>,
    pub end_time: Option<Timestamp>,
    pub status: i32,
    #[serde(rename = "type")]
    pub transaction_type: i32,
    pub error: Option<TransactionError>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransactionMeta {
    pub host: String,
    pub path: String,
    pub method: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransactionError {
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SortingTransactionList {
    /// [`TransactionSortKey`], `0` for start time
    pub sort_by: i32,
    /// [`SortDirection`], `0` for descending
    pub direction: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GetTransactionsRequest {
    pub application_id: String,
    pub time_range: Option<TimeFilter>,
    pub host: Option<String>,
    pub name: Option<String>,
    pub path: Option<String>,
    pub method: Option<String>,
    #[serde(rename = "type")]
    pub transaction_type: i32,
    pub status: i32,
    pub sort: Option<SortingTransactionList>,
    pub pagination: Option<Pagination>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GetTransactionsResponse {
    pub transactions: Vec<TransactionInfo>,
    pub count: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GetTransactionByIdRequest {
    pub transaction_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GetTransactionByIdResponse {
    pub transaction: Option<TransactionInfo>,
    /// Every descendant of `transaction`, flattened
    pub children: Vec<TransactionInfo>,
}

/// Materialized trace tree
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionTree {
    #[serde(default)]
    pub transaction: TransactionInfo,
    #[serde(default)]
    pub children: Vec<TransactionTree>,
}

// Deep traces would otherwise be dropped one stack frame per level.
impl Drop for TransactionTree {
    fn drop(&mut self) {
        let mut pending = std::mem::take(&mut self.children);
        while let Some(mut node) = pending.pop() {
            pending.append(&mut node.children);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GetTransactionGroupRequest {
    pub application_id: String,
    pub time_range: Option<TimeFilter>,
    /// [`GroupKey`], `0` for grouping by type
    pub group_type: i32,
    #[serde(rename = "type")]
    pub transaction_type: i32,
    pub status: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransactionGroup {
    pub count: i64,
    pub success_count: i64,
    /// Mean duration in nanoseconds
    pub average_time: f64,
    pub min_time: i64,
    pub max_time: i64,
    /// Earliest end time in the group (nanoseconds since epoch)
    pub low_time: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GetTransactionGroupResponse {
    pub transactions: HashMap<String, TransactionGroup>,
}

//! Message types for actor communication
//!
//! Commands go to one actor over mpsc and may carry a oneshot for the reply.
//! Events are broadcast and cloned to every subscriber.

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use crate::{
    incidents::Transition,
    probes::ProbeResult,
    wire::{Metric, SchedulerResponse},
};

/// Published by a scheduler after every probe execution
#[derive(Debug, Clone)]
pub struct CheckEvent {
    pub check_id: String,

    /// Rule the result counts against
    pub rule: String,

    pub result: ProbeResult,

    /// The result as a scheduler snapshot, ready to persist
    pub response: SchedulerResponse,
}

/// Published by a collector for every stat report an agent returned
#[derive(Debug, Clone)]
pub struct StatEvent {
    pub agent_id: String,
    pub metric: Metric,
    pub received_at: DateTime<Utc>,
}

/// Published by the incident actor for every transition that touched an
/// incident
#[derive(Debug, Clone)]
pub struct IncidentEvent {
    pub rule: String,
    pub transition: Transition,
}

/// Commands that can be sent to a SchedulerActor
#[derive(Debug)]
pub enum SchedulerCommand {
    /// Run the probe now, outside the interval timer
    CheckNow {
        respond_to: oneshot::Sender<ProbeResult>,
    },

    UpdateInterval {
        interval_secs: u64,
    },

    Shutdown,
}

/// Commands that can be sent to a CollectorActor
#[derive(Debug)]
pub enum CollectorCommand {
    /// Poll the agent now, outside the interval timer
    PollNow {
        respond_to: oneshot::Sender<anyhow::Result<()>>,
    },

    UpdateInterval {
        interval_secs: u64,
    },

    Shutdown,
}

/// Commands that can be sent to the IncidentActor
#[derive(Debug)]
pub enum IncidentCommand {
    /// Feed one result directly, bypassing the event channel
    Observe {
        rule: String,
        result: ProbeResult,
        respond_to: oneshot::Sender<Transition>,
    },

    Shutdown,
}

/// Commands that can be sent to the StorageActor
#[derive(Debug)]
pub enum StorageCommand {
    /// Write the pending stat batch now; replies with the number of rows written
    Flush {
        respond_to: oneshot::Sender<anyhow::Result<usize>>,
    },

    /// Run retention cleanup now; replies with the number of records deleted
    Cleanup {
        respond_to: oneshot::Sender<anyhow::Result<u64>>,
    },

    GetStats {
        respond_to: oneshot::Sender<StorageStats>,
    },

    /// Flush, close the backend and stop; the reply is sent once the backend
    /// is closed
    Shutdown { respond_to: oneshot::Sender<()> },
}

/// Storage actor counters
#[derive(Debug, Clone, Default)]
pub struct StorageStats {
    pub snapshots_written: u64,
    pub incidents_written: u64,
    pub stats_written: u64,

    /// Rows waiting in the stat batch
    pub pending_stats: usize,

    pub flush_count: u64,

    /// Write failures, fatal or not
    pub write_errors: u64,

    /// Stats discarded because retries would overflow the batch
    pub stats_dropped: u64,

    pub last_cleanup_time: Option<DateTime<Utc>>,
    pub total_deleted: u64,
}

use tracing::warn;

use super::{ConvertError, nanos_to_timestamp, required_nanos, time_range};
use crate::storage::query::StatQuery;
use crate::storage::schema::{CpuRow, DiskRow, MemoryRow, MemoryUsageRow, NetRow, StatRow};
use crate::wire::{
    CpuInfo, CpuLoad, DiskInfo, DiskUsage, GetAgentInformationRequest, MemoryInfo, MemoryUsage,
    Metric, NetInfo, NetInterface,
};

/// Decode an agent report.
///
/// Sections the agent left out stay absent in the record; disk and
/// network maps become name-sorted lists.
pub fn to_stat_row(metric: &Metric) -> Result<StatRow, ConvertError> {
    if metric.agent_id.is_empty() {
        return Err(ConvertError::EmptyRequest("agent_id"));
    }

    Ok(StatRow {
        agent_id: metric.agent_id.clone(),
        agent_name: metric.agent_name.clone(),
        time: required_nanos(metric.time.as_ref(), "time")?,
        cpus: metric
            .cpu_info
            .as_ref()
            .map(|info| info.cpus.iter().map(|c| CpuRow { load: c.load }).collect())
            .unwrap_or_default(),
        memory: metric.memory_info.as_ref().and_then(to_memory_row),
        disks: metric
            .disk_info
            .as_ref()
            .map(|info| {
                let mut disks: Vec<DiskRow> = info
                    .disks
                    .iter()
                    .map(|(name, d)| DiskRow {
                        name: name.clone(),
                        total: d.total,
                        free: d.free,
                        used: d.used,
                        used_percent: d.used_percent,
                    })
                    .collect();
                disks.sort_by(|a, b| a.name.cmp(&b.name));
                disks
            })
            .unwrap_or_default(),
        nets: metric
            .net_info
            .as_ref()
            .map(|info| {
                let mut nets: Vec<NetRow> = info
                    .interfaces
                    .iter()
                    .map(|(name, n)| NetRow {
                        name: name.clone(),
                        bytes_sent: n.bytes_sent,
                        bytes_recv: n.bytes_recv,
                        packets_sent: n.packets_sent,
                        packets_recv: n.packets_recv,
                        err_in: n.err_in,
                        err_out: n.err_out,
                        drop_in: n.drop_in,
                        drop_out: n.drop_out,
                    })
                    .collect();
                nets.sort_by(|a, b| a.name.cmp(&b.name));
                nets
            })
            .unwrap_or_default(),
    })
}

fn to_memory_row(info: &MemoryInfo) -> Option<MemoryRow> {
    let usage = |u: &MemoryUsage| MemoryUsageRow {
        total: u.total,
        used: u.used,
        free: u.free,
        shared: u.shared,
        used_percent: u.used_percent,
    };

    if info.mem.is_none() && info.swap.is_none() {
        return None;
    }
    Some(MemoryRow {
        mem: info.mem.as_ref().map(usage),
        swap: info.swap.as_ref().map(usage),
    })
}

fn from_memory_row(row: &MemoryRow) -> Option<MemoryInfo> {
    let usage = |u: &MemoryUsageRow| MemoryUsage {
        total: u.total,
        used: u.used,
        free: u.free,
        shared: u.shared,
        used_percent: u.used_percent,
    };

    if row.mem.is_none() && row.swap.is_none() {
        return None;
    }
    Some(MemoryInfo {
        mem: row.mem.as_ref().map(usage),
        swap: row.swap.as_ref().map(usage),
    })
}

/// Encode a stored report; empty sections collapse to absent
pub fn from_stat_row(row: &StatRow) -> Metric {
    Metric {
        agent_id: row.agent_id.clone(),
        agent_name: row.agent_name.clone(),
        cpu_info: (!row.cpus.is_empty()).then(|| CpuInfo {
            cpus: row.cpus.iter().map(|c| CpuLoad { load: c.load }).collect(),
        }),
        memory_info: row.memory.as_ref().and_then(from_memory_row),
        disk_info: (!row.disks.is_empty()).then(|| DiskInfo {
            disks: row
                .disks
                .iter()
                .map(|d| {
                    (
                        d.name.clone(),
                        DiskUsage {
                            total: d.total,
                            free: d.free,
                            used: d.used,
                            used_percent: d.used_percent,
                        },
                    )
                })
                .collect(),
        }),
        net_info: (!row.nets.is_empty()).then(|| NetInfo {
            interfaces: row
                .nets
                .iter()
                .map(|n| {
                    (
                        n.name.clone(),
                        NetInterface {
                            bytes_sent: n.bytes_sent,
                            bytes_recv: n.bytes_recv,
                            packets_sent: n.packets_sent,
                            packets_recv: n.packets_recv,
                            err_in: n.err_in,
                            err_out: n.err_out,
                            drop_in: n.drop_in,
                            drop_out: n.drop_out,
                        },
                    )
                })
                .collect(),
        }),
        time: Some(nanos_to_timestamp(row.time)),
    }
}

pub fn from_stat_rows(rows: &[StatRow]) -> Vec<Metric> {
    rows.iter().map(from_stat_row).collect()
}

/// Decode a batch of reports, logging and skipping the ones that fail
pub fn to_stat_rows(metrics: &[Metric]) -> Vec<StatRow> {
    metrics
        .iter()
        .filter_map(|metric| match to_stat_row(metric) {
            Ok(row) => Some(row),
            Err(e) => {
                warn!(agent_id = %metric.agent_id, "skipping stat report: {}", e);
                None
            }
        })
        .collect()
}

pub fn stat_query(request: &GetAgentInformationRequest) -> Result<StatQuery, ConvertError> {
    if request.agent_id.is_empty() {
        return Err(ConvertError::EmptyRequest("agent_id"));
    }

    Ok(StatQuery {
        agent_id: request.agent_id.clone(),
        range: time_range(request.time_range.as_ref())?,
        pagination: request.pagination,
    })
}

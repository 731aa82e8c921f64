use tracing::warn;

use super::{
    ConvertError, Degraded, decode_enum, decode_optional_enum, nanos_to_timestamp, required_nanos,
    time_range,
};
use crate::probes::{ProbeResult, ProbeStatus};
use crate::storage::query::SnapshotQuery;
use crate::storage::schema::{SnapshotRow, UptimeResult};
use crate::wire::{
    GetSchedulerInformationRequest, GetSchedulerUptimeResponse, SchedulerCode, SchedulerResponse,
    SchedulerSnapshot, SchedulerType, SnapshotError, SnapshotMeta, SortDirection, Timestamp,
};

/// Decode a scheduler report into a persisted snapshot.
///
/// The meta value is stored as its JSON text; rendering a parsed JSON value
/// cannot fail, so only reading it back is best-effort.
pub fn to_snapshot_row(response: &SchedulerResponse) -> Result<SnapshotRow, ConvertError> {
    let snapshot = response
        .snapshot
        .as_ref()
        .ok_or(ConvertError::EmptySnapshot)?;
    let meta = snapshot.meta.as_ref().ok_or(ConvertError::EmptyMeta)?;

    Ok(SnapshotRow {
        scheduler_id: response.scheduler_id.clone(),
        code: decode_enum(snapshot.code, SchedulerCode::NAME)?,
        check_type: decode_enum(snapshot.check_type, SchedulerType::NAME)?,
        error: snapshot.error.as_ref().map(|e| e.message.clone()),
        meta_start_time: required_nanos(meta.start_time.as_ref(), "meta.start_time")?,
        meta_end_time: required_nanos(meta.end_time.as_ref(), "meta.end_time")?,
        meta_value: meta
            .value
            .as_ref()
            .map(|value| value.to_string().into_bytes())
            .unwrap_or_default(),
    })
}

/// Encode a persisted snapshot for the wire.
///
/// An empty meta value stays absent; one that no longer parses is dropped
/// and reported through [`Degraded`].
pub fn from_snapshot_row(row: &SnapshotRow) -> Degraded<SchedulerSnapshot> {
    let mut meta = SnapshotMeta {
        start_time: Some(nanos_to_timestamp(row.meta_start_time)),
        end_time: Some(nanos_to_timestamp(row.meta_end_time)),
        value: None,
    };

    let mut degraded = false;
    if !row.meta_value.is_empty() {
        match serde_json::from_slice(&row.meta_value) {
            Ok(value) => meta.value = Some(value),
            Err(_) => degraded = true,
        }
    }

    let snapshot = SchedulerSnapshot {
        code: row.code.code(),
        check_type: row.check_type.code(),
        error: row
            .error
            .as_ref()
            .filter(|message| !message.is_empty())
            .map(|message| SnapshotError {
                message: message.clone(),
            }),
        meta: Some(meta),
    };

    Degraded { value: snapshot, degraded }
}

pub fn from_snapshot_rows(rows: &[SnapshotRow]) -> Vec<SchedulerSnapshot> {
    rows.iter()
        .map(|row| {
            let snapshot = from_snapshot_row(row);
            if snapshot.is_degraded() {
                warn!(
                    scheduler_id = %row.scheduler_id,
                    start = row.meta_start_time,
                    "dropping undecodable snapshot meta value"
                );
            }
            snapshot.into_inner()
        })
        .collect()
}

/// Build the report a scheduler sends for one probe execution
pub fn snapshot_from_probe(scheduler_id: &str, result: &ProbeResult) -> SchedulerResponse {
    let start = Timestamp::from_datetime(&result.timestamp);
    let end = chrono::Duration::from_std(result.elapsed)
        .ok()
        .and_then(|elapsed| result.timestamp.checked_add_signed(elapsed))
        .map(|end| Timestamp::from_datetime(&end))
        .unwrap_or(start);

    let code = match result.status {
        ProbeStatus::Ok => SchedulerCode::Ok,
        ProbeStatus::Error => SchedulerCode::Error,
    };

    SchedulerResponse {
        scheduler_id: scheduler_id.to_string(),
        snapshot: Some(SchedulerSnapshot {
            code: code.code(),
            check_type: result.kind.code(),
            error: (result.status == ProbeStatus::Error).then(|| SnapshotError {
                message: result.description.clone(),
            }),
            meta: Some(SnapshotMeta {
                start_time: Some(start),
                end_time: Some(end),
                value: Some(serde_json::json!({
                    "id": result.id,
                    "location": result.location,
                    "port": result.port,
                    "description": result.description,
                })),
            }),
        }),
    }
}

pub fn snapshot_query(request: &GetSchedulerInformationRequest) -> Result<SnapshotQuery, ConvertError> {
    if request.scheduler_id.is_empty() {
        return Err(ConvertError::EmptyRequest("scheduler_id"));
    }

    Ok(SnapshotQuery {
        scheduler_id: request.scheduler_id.clone(),
        range: time_range(request.time_range.as_ref())?,
        code: decode_optional_enum(request.code, SchedulerCode::NAME)?,
        direction: decode_optional_enum(request.direction, SortDirection::NAME)?
            .unwrap_or(SortDirection::Desc),
        pagination: request.pagination,
    })
}

/// Uptime share and mean latency.
///
/// Only the integral part of the backend's latency rendering is parsed; a
/// rendering that doesn't parse yields zero uptime and zero latency.
pub fn uptime_response(result: &UptimeResult) -> GetSchedulerUptimeResponse {
    let integral = result.latency.split('.').next().unwrap_or_default();
    let Ok(latency) = integral.parse::<f64>() else {
        return GetSchedulerUptimeResponse {
            uptime: 0.0,
            latency: 0.0,
        };
    };

    let uptime = if result.total == 0 {
        0.0
    } else {
        result.count as f64 / result.total as f64
    };

    GetSchedulerUptimeResponse { uptime, latency }
}

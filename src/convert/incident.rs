use super::{
    ConvertError, decode_enum, decode_optional_enum, nanos_to_timestamp, required_nanos,
    time_range,
};
use crate::storage::query::IncidentQuery;
use crate::storage::schema::{IncidentHistoryRow, IncidentRow};
use crate::wire::{GetIncidentsListRequest, Incident, IncidentHistoryItem, IncidentStatus};

/// Decode a wire incident into a persisted record.
///
/// Start and end are the smallest and largest history timestamps; an
/// incident without history gets `now` for both. A history entry with a
/// missing or malformed timestamp fails the whole conversion.
pub fn to_incident_row(incident: &Incident, now: i64) -> Result<IncidentRow, ConvertError> {
    let status = decode_enum(incident.status, IncidentStatus::NAME)?;

    let histories = incident
        .histories
        .iter()
        .map(|item| {
            Ok(IncidentHistoryRow {
                status: decode_enum(item.status, IncidentStatus::NAME)?,
                timestamp: required_nanos(item.timestamp.as_ref(), "history.timestamp")?,
            })
        })
        .collect::<Result<Vec<_>, ConvertError>>()?;

    let start_time = histories.iter().map(|h| h.timestamp).min().unwrap_or(now);
    let end_time = histories.iter().map(|h| h.timestamp).max().unwrap_or(now);

    Ok(IncidentRow {
        incident_id: incident.id.clone(),
        rule_id: incident.rule_id.clone(),
        status,
        start_time,
        end_time,
        histories,
    })
}

pub fn from_incident_row(row: &IncidentRow) -> Incident {
    Incident {
        id: row.incident_id.clone(),
        status: row.status.code(),
        rule_id: row.rule_id.clone(),
        histories: row
            .histories
            .iter()
            .map(|h| IncidentHistoryItem {
                status: h.status.code(),
                timestamp: Some(nanos_to_timestamp(h.timestamp)),
            })
            .collect(),
    }
}

pub fn incident_query(request: &GetIncidentsListRequest) -> Result<IncidentQuery, ConvertError> {
    Ok(IncidentQuery {
        rule_id: request.rule_id.clone().filter(|r| !r.is_empty()),
        status: decode_optional_enum(request.status, IncidentStatus::NAME)?,
        range: request
            .time_range
            .as_ref()
            .map(|filter| time_range(Some(filter)))
            .transpose()?,
        pagination: request.pagination,
    })
}

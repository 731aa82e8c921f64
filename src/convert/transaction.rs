use std::collections::BTreeMap;

use super::{
    ConvertError, decode_enum, decode_optional_enum, nanos_to_timestamp, required_nanos,
    time_range,
};
use crate::storage::query::{GroupQuery, TransactionFilter, TransactionQuery, TransactionSort};
use crate::storage::schema::{GroupResult, TransactionRow};
use crate::wire::{
    GetTransactionGroupRequest, GetTransactionGroupResponse, GetTransactionsRequest, GroupKey,
    SortDirection, TimeFilter, TransactionError, TransactionGroup, TransactionInfo,
    TransactionMeta, TransactionSortKey, TransactionStatus, TransactionType,
};

pub fn to_transaction_row(info: &TransactionInfo) -> Result<TransactionRow, ConvertError> {
    if info.id.is_empty() {
        return Err(ConvertError::MissingField("id"));
    }
    if info.application_id.is_empty() {
        return Err(ConvertError::MissingField("application_id"));
    }
    let meta = info.meta.clone().unwrap_or_default();

    Ok(TransactionRow {
        transaction_id: info.id.clone(),
        application_id: info.application_id.clone(),
        parent_id: info.parent_id.clone(),
        host: meta.host,
        path: meta.path,
        method: meta.method,
        name: info.name.clone(),
        start_time: required_nanos(info.start_time.as_ref(), "start_time")?,
        end_time: required_nanos(info.end_time.as_ref(), "end_time")?,
        status: decode_enum(info.status, TransactionStatus::NAME)?,
        transaction_type: decode_enum(info.transaction_type, TransactionType::NAME)?,
        error: info.error.as_ref().map(|e| e.message.clone()),
    })
}

pub fn from_transaction_row(row: &TransactionRow) -> TransactionInfo {
    TransactionInfo {
        id: row.transaction_id.clone(),
        application_id: row.application_id.clone(),
        parent_id: row.parent_id.clone(),
        meta: Some(TransactionMeta {
            host: row.host.clone(),
            path: row.path.clone(),
            method: row.method.clone(),
        }),
        name: row.name.clone(),
        start_time: Some(nanos_to_timestamp(row.start_time)),
        end_time: Some(nanos_to_timestamp(row.end_time)),
        status: row.status.code(),
        transaction_type: row.transaction_type.code(),
        error: row.error.as_ref().map(|message| TransactionError {
            message: message.clone(),
        }),
    }
}

pub fn from_transaction_rows(rows: &[TransactionRow]) -> Vec<TransactionInfo> {
    rows.iter().map(from_transaction_row).collect()
}

/// Build a transaction filter; the time range is mandatory, string filters
/// apply only when non-empty and enum filters only when non-zero.
#[allow(clippy::too_many_arguments)]
fn transaction_filter(
    application_id: &str,
    range: Option<&TimeFilter>,
    host: &Option<String>,
    name: &Option<String>,
    path: &Option<String>,
    method: &Option<String>,
    transaction_type: i32,
    status: i32,
) -> Result<TransactionFilter, ConvertError> {
    if application_id.is_empty() {
        return Err(ConvertError::EmptyRequest("application_id"));
    }
    let range = range.ok_or(ConvertError::MissingField("time_range"))?;
    let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.is_empty());

    Ok(TransactionFilter {
        application_id: application_id.to_string(),
        range: time_range(Some(range))?,
        host: non_empty(host),
        name: non_empty(name),
        path: non_empty(path),
        method: non_empty(method),
        transaction_type: decode_optional_enum(transaction_type, TransactionType::NAME)?,
        status: decode_optional_enum(status, TransactionStatus::NAME)?,
    })
}

pub fn transaction_query(request: &GetTransactionsRequest) -> Result<TransactionQuery, ConvertError> {
    let filter = transaction_filter(
        &request.application_id,
        request.time_range.as_ref(),
        &request.host,
        &request.name,
        &request.path,
        &request.method,
        request.transaction_type,
        request.status,
    )?;

    let sort = request.sort.unwrap_or_default();
    let sort = TransactionSort {
        key: decode_optional_enum(sort.sort_by, TransactionSortKey::NAME)?
            .unwrap_or(TransactionSortKey::StartTime),
        direction: decode_optional_enum(sort.direction, SortDirection::NAME)?
            .unwrap_or(SortDirection::Desc),
    };

    Ok(TransactionQuery {
        filter,
        sort,
        pagination: request.pagination,
    })
}

pub fn group_query(request: &GetTransactionGroupRequest) -> Result<GroupQuery, ConvertError> {
    let filter = transaction_filter(
        &request.application_id,
        request.time_range.as_ref(),
        &None,
        &None,
        &None,
        &None,
        request.transaction_type,
        request.status,
    )?;

    Ok(GroupQuery {
        filter,
        key: decode_optional_enum(request.group_type, GroupKey::NAME)?.unwrap_or(GroupKey::Type),
    })
}

pub fn group_response(groups: BTreeMap<String, GroupResult>) -> GetTransactionGroupResponse {
    GetTransactionGroupResponse {
        transactions: groups
            .into_iter()
            .map(|(name, g)| {
                (
                    name,
                    TransactionGroup {
                        count: g.count,
                        success_count: g.success_count,
                        average_time: g.average_time,
                        min_time: g.min_time,
                        max_time: g.max_time,
                        low_time: g.low_time,
                    },
                )
            })
            .collect(),
    }
}

//! Query parameters and the in-process filter/sort/group/paginate semantics
//!
//! Backends that cannot push a query down (the in-memory backend, or the
//! default trait methods) share these helpers so every backend answers a
//! query the same way.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::wire::{
    GroupKey, IncidentStatus, Pagination, SchedulerCode, SortDirection, TransactionSortKey,
    TransactionStatus, TransactionType,
};

use super::schema::{GroupResult, TransactionRow};

/// Inclusive time window in nanoseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub from: i64,
    pub to: i64,
}

impl TimeRange {
    pub fn new(from: i64, to: i64) -> Self {
        Self { from, to }
    }

    /// Window covering every representable instant
    pub fn unbounded() -> Self {
        Self {
            from: i64::MIN,
            to: i64::MAX,
        }
    }

    pub fn contains(&self, t: i64) -> bool {
        self.from <= t && t <= self.to
    }

    /// True when no instant falls inside the window
    pub fn is_empty(&self) -> bool {
        self.from > self.to
    }
}

/// One page of results together with the unpaged total
#[derive(Debug, Clone, PartialEq)]
pub struct Paged<T> {
    pub items: Vec<T>,
    pub total: i64,
}

impl<T> Paged<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Paged<U> {
        Paged {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
        }
    }
}

/// Apply an optional page request to an already filtered and sorted list
pub fn paginate<T>(items: Vec<T>, pagination: Option<Pagination>) -> Paged<T> {
    let total = items.len() as i64;
    let Some(pagination) = pagination else {
        return Paged { items, total };
    };

    let (offset, limit) = pagination.window(total);
    let items = items
        .into_iter()
        .skip(offset as usize)
        .take(limit as usize)
        .collect();

    Paged { items, total }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotQuery {
    pub scheduler_id: String,
    pub range: TimeRange,
    pub code: Option<SchedulerCode>,
    /// Direction over `meta_start_time`
    pub direction: SortDirection,
    pub pagination: Option<Pagination>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatQuery {
    pub agent_id: String,
    pub range: TimeRange,
    pub pagination: Option<Pagination>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct IncidentQuery {
    pub rule_id: Option<String>,
    pub status: Option<IncidentStatus>,
    /// Matches incidents whose start time falls in the window
    pub range: Option<TimeRange>,
    pub pagination: Option<Pagination>,
}

/// Equality filters over transactions
///
/// Every optional field that is `Some` must match; the time range applies to
/// the start time and is always present.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionFilter {
    pub application_id: String,
    pub range: TimeRange,
    pub host: Option<String>,
    pub name: Option<String>,
    pub path: Option<String>,
    pub method: Option<String>,
    pub transaction_type: Option<TransactionType>,
    pub status: Option<TransactionStatus>,
}

impl TransactionFilter {
    pub fn new(application_id: impl Into<String>, range: TimeRange) -> Self {
        Self {
            application_id: application_id.into(),
            range,
            host: None,
            name: None,
            path: None,
            method: None,
            transaction_type: None,
            status: None,
        }
    }

    pub fn matches(&self, row: &TransactionRow) -> bool {
        fn eq(want: &Option<String>, have: &str) -> bool {
            want.as_deref().is_none_or(|w| w == have)
        }

        row.application_id == self.application_id
            && self.range.contains(row.start_time)
            && eq(&self.host, &row.host)
            && eq(&self.name, &row.name)
            && eq(&self.path, &row.path)
            && eq(&self.method, &row.method)
            && self
                .transaction_type
                .is_none_or(|t| t == row.transaction_type)
            && self.status.is_none_or(|s| s == row.status)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionSort {
    pub key: TransactionSortKey,
    pub direction: SortDirection,
}

impl Default for TransactionSort {
    fn default() -> Self {
        Self {
            key: TransactionSortKey::StartTime,
            direction: SortDirection::Desc,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransactionQuery {
    pub filter: TransactionFilter,
    pub sort: TransactionSort,
    pub pagination: Option<Pagination>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupQuery {
    pub filter: TransactionFilter,
    pub key: GroupKey,
}

/// Stable sort by the requested key, ties broken by transaction id
pub fn sort_transactions(rows: &mut [TransactionRow], sort: TransactionSort) {
    let key = |row: &TransactionRow| match sort.key {
        TransactionSortKey::Duration => row.duration(),
        TransactionSortKey::StartTime => row.start_time,
        TransactionSortKey::EndTime => row.end_time,
    };

    rows.sort_by(|a, b| {
        let ord = key(a)
            .cmp(&key(b))
            .then_with(|| a.transaction_id.cmp(&b.transaction_id));
        apply_direction(ord, sort.direction)
    });
}

pub(crate) fn apply_direction(ord: Ordering, direction: SortDirection) -> Ordering {
    match direction {
        SortDirection::Asc => ord,
        SortDirection::Desc => ord.reverse(),
    }
}

/// Name of the group a transaction falls into
pub fn group_name(row: &TransactionRow, key: GroupKey) -> String {
    match key {
        GroupKey::Type => row.transaction_type.code().to_string(),
        GroupKey::Name => row.name.clone(),
        GroupKey::Method => row.method.clone(),
        GroupKey::Host => row.host.clone(),
        GroupKey::Path => row.path.clone(),
    }
}

/// Aggregate transactions into per-group statistics
pub fn group_transactions<'a>(
    rows: impl IntoIterator<Item = &'a TransactionRow>,
    key: GroupKey,
) -> BTreeMap<String, GroupResult> {
    struct Acc {
        count: i64,
        success: i64,
        sum: i128,
        min: i64,
        max: i64,
        low: i64,
    }

    let mut groups: BTreeMap<String, Acc> = BTreeMap::new();
    for row in rows {
        let duration = row.duration();
        let acc = groups.entry(group_name(row, key)).or_insert(Acc {
            count: 0,
            success: 0,
            sum: 0,
            min: i64::MAX,
            max: i64::MIN,
            low: i64::MAX,
        });
        acc.count += 1;
        if row.status == TransactionStatus::Success {
            acc.success += 1;
        }
        acc.sum += i128::from(duration);
        acc.min = acc.min.min(duration);
        acc.max = acc.max.max(duration);
        acc.low = acc.low.min(row.end_time);
    }

    groups
        .into_iter()
        .map(|(name, acc)| {
            let result = GroupResult {
                name: name.clone(),
                count: acc.count,
                success_count: acc.success,
                average_time: acc.sum as f64 / acc.count as f64,
                min_time: acc.min,
                max_time: acc.max,
                low_time: acc.low,
            };
            (name, result)
        })
        .collect()
}

//! Mapping between wire messages and persisted records
//!
//! Every function here is pure: the only clock reading is passed in by the
//! caller. Decoding validates enum codes and timestamps, so anything that
//! reaches a [`StorageBackend`](crate::storage::StorageBackend) or the
//! incident engine is already well-formed.

mod incident;
mod snapshot;
mod stat;
mod transaction;

pub use incident::*;
pub use snapshot::*;
pub use stat::*;
pub use transaction::*;

use thiserror::Error;

use crate::storage::query::TimeRange;
use crate::wire::{TimeFilter, Timestamp};

/// Earliest representable wire timestamp (0001-01-01T00:00:00Z)
pub const MIN_TIMESTAMP_SECONDS: i64 = -62_135_596_800;
/// Latest representable wire timestamp (9999-12-31T23:59:59Z)
pub const MAX_TIMESTAMP_SECONDS: i64 = 253_402_300_799;

const NANOS_PER_SECOND: i64 = 1_000_000_000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConvertError {
    #[error("invalid timestamp {seconds}s {nanos}ns: {reason}")]
    Timestamp {
        seconds: i64,
        nanos: i32,
        reason: &'static str,
    },

    #[error("invalid {kind} code {code}")]
    InvalidEnum { kind: &'static str, code: i32 },

    #[error("ERROR_SNAPSHOT_IS_EMPTY")]
    EmptySnapshot,

    #[error("EMPTY_META_DATA")]
    EmptyMeta,

    #[error("empty request: {0}")]
    EmptyRequest(&'static str),

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("time range starts at {from} after it ends at {to}")]
    InvalidRange { from: i64, to: i64 },
}

/// A value produced by a best-effort conversion
///
/// `degraded` is set when some optional part of the input could not be
/// converted and was replaced by its empty form instead of failing the
/// whole conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct Degraded<T> {
    pub value: T,
    pub degraded: bool,
}

impl<T> Degraded<T> {
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

/// Wire timestamp to nanoseconds since the Unix epoch
pub fn timestamp_to_nanos(ts: &Timestamp) -> Result<i64, ConvertError> {
    let invalid = |reason| ConvertError::Timestamp {
        seconds: ts.seconds,
        nanos: ts.nanos,
        reason,
    };

    if !(MIN_TIMESTAMP_SECONDS..=MAX_TIMESTAMP_SECONDS).contains(&ts.seconds) {
        return Err(invalid("seconds out of range"));
    }
    if !(0..NANOS_PER_SECOND).contains(&i64::from(ts.nanos)) {
        return Err(invalid("nanos out of range"));
    }

    ts.seconds
        .checked_mul(NANOS_PER_SECOND)
        .and_then(|n| n.checked_add(i64::from(ts.nanos)))
        .ok_or_else(|| invalid("not representable in nanoseconds"))
}

/// Required wire timestamp to nanoseconds
pub fn required_nanos(ts: Option<&Timestamp>, field: &'static str) -> Result<i64, ConvertError> {
    timestamp_to_nanos(ts.ok_or(ConvertError::MissingField(field))?)
}

/// Nanoseconds since the Unix epoch to a wire timestamp
pub fn nanos_to_timestamp(nanos: i64) -> Timestamp {
    Timestamp {
        seconds: nanos.div_euclid(NANOS_PER_SECOND),
        nanos: nanos.rem_euclid(NANOS_PER_SECOND) as i32,
    }
}

/// Decode a mandatory enum code
pub fn decode_enum<E>(code: i32, kind: &'static str) -> Result<E, ConvertError>
where
    E: TryFrom<i32, Error = i32>,
{
    E::try_from(code).map_err(|code| ConvertError::InvalidEnum { kind, code })
}

/// Decode an optional enum code where `0` means "unspecified"
pub fn decode_optional_enum<E>(code: i32, kind: &'static str) -> Result<Option<E>, ConvertError>
where
    E: TryFrom<i32, Error = i32>,
{
    if code == 0 {
        return Ok(None);
    }
    decode_enum(code, kind).map(Some)
}

/// Resolve a wire time filter; missing bounds are open.
///
/// A window whose start lies after its end is rejected. `from == to`
/// selects the single instant.
pub fn time_range(filter: Option<&TimeFilter>) -> Result<TimeRange, ConvertError> {
    let Some(filter) = filter else {
        return Ok(TimeRange::unbounded());
    };

    let from = match &filter.from {
        Some(ts) => timestamp_to_nanos(ts)?,
        None => i64::MIN,
    };
    let to = match &filter.to {
        Some(ts) => timestamp_to_nanos(ts)?,
        None => i64::MAX,
    };

    if from > to {
        return Err(ConvertError::InvalidRange { from, to });
    }

    Ok(TimeRange::new(from, to))
}

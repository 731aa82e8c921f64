//! Batched stat ingestion

use std::sync::{Mutex, MutexGuard};

use super::schema::StatRow;

/// Accumulates stat rows from many producers until they are dispatched.
///
/// Producers only need `&self`; the rows are taken out in one piece by
/// [`StatBatch::take`] and written by the backend as a single transaction.
#[derive(Debug, Default)]
pub struct StatBatch {
    rows: Mutex<Vec<StatRow>>,
}

impl StatBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            rows: Mutex::new(Vec::with_capacity(capacity)),
        }
    }

    /// Append one row, returning the batch length after the push
    pub fn push(&self, row: StatRow) -> usize {
        let mut rows = self.lock();
        rows.push(row);
        rows.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drain every accumulated row, leaving the batch empty
    pub fn take(&self) -> Vec<StatRow> {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, Vec<StatRow>> {
        // A panicking producer cannot leave a half-pushed Vec behind.
        self.rows.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

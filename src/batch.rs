//! Batch accumulation and run statistics.

use crate::record::Record;
use serde::Serialize;
use std::fmt;

/// Upper bound on records reserved up front; larger batches grow on demand.
const MAX_PREALLOCATED: usize = 65_536;

/// Records waiting for the next flush.
#[derive(Debug, Default)]
pub struct Batch {
    records: Vec<Record>,
}

impl Batch {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Vec::with_capacity(capacity.min(MAX_PREALLOCATED)),
        }
    }

    pub fn push(&mut self, record: Record) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}

/// Split records into the parallel key/vector arrays bound to `UNNEST`.
pub fn columns(records: &[Record]) -> (Vec<&str>, Vec<&str>) {
    records
        .iter()
        .map(|record| (record.key.as_str(), record.vector.as_str()))
        .unzip()
}

/// Where the loader is in its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoaderState {
    Streaming,
    /// Inside a batch boundary: insert and commit in progress.
    Flushing,
    /// Input exhausted and the last batch committed.
    Finished,
    /// Stopped on a fatal error; no further lines are read.
    Aborted,
}

/// Counters for a single loader run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadStats {
    /// Lines read from the source, including skipped ones
    pub lines_read: u64,
    /// Lines skipped because of their shape
    pub malformed: u64,
    /// Records sent to the database
    pub submitted: u64,
    /// Rows the database actually wrote
    pub inserted: u64,
    /// Records dropped by the unique-key conflict clause
    pub conflicts: u64,
    /// Committed batches
    pub batches: u64,
}

impl LoadStats {
    /// Account for one committed batch of `submitted` records, `inserted` of which were new.
    pub fn record_flush(&mut self, submitted: u64, inserted: u64) {
        self.submitted += submitted;
        self.inserted += inserted;
        self.conflicts += submitted.saturating_sub(inserted);
        self.batches += 1;
    }
}

impl fmt::Display for LoadStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Load summary:")?;
        writeln!(f, "  lines read: {}", self.lines_read)?;
        writeln!(f, "  inserted: {}", self.inserted)?;
        writeln!(f, "  skipped (already present): {}", self.conflicts)?;
        writeln!(f, "  malformed: {}", self.malformed)?;
        write!(f, "  batches committed: {}", self.batches)
    }
}

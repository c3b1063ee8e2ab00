//! Point-in-time snapshots and the queries served from them.
//!
//! A [`Snapshot`] is built once from the records of a collection and never
//! changes afterwards. Queries borrow from it: range filtering, the three
//! sort modes, hot ranking and skip/limit pagination.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::record::{Comment, Record};

/// Reference epoch of the hot ranking (seconds).
pub const HOT_EPOCH_SECS: i64 = 1_134_028_003;

/// Seconds of age worth one order of magnitude of score.
pub const HOT_DECAY_SECS: f64 = 45_000.0;

/// Ordering applied by [`Snapshot::query`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortMode {
    /// Newest first.
    New,
    /// Oldest first.
    Old,
    /// Highest score first.
    #[default]
    Top,
}

impl SortMode {
    /// Lowercase name as used on the query surface.
    pub fn as_str(&self) -> &'static str {
        match self {
            SortMode::New => "new",
            SortMode::Old => "old",
            SortMode::Top => "top",
        }
    }
}

impl fmt::Display for SortMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(SortMode::New),
            "old" => Ok(SortMode::Old),
            "top" => Ok(SortMode::Top),
            other => Err(format!("unknown sort mode '{}', expected new, old or top", other)),
        }
    }
}

/// Filter, sort and pagination parameters for [`Snapshot::query`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotQuery {
    /// Inclusive lower bound on creation time.
    pub start: Option<DateTime<Utc>>,
    /// Inclusive upper bound on creation time.
    pub end: Option<DateTime<Utc>>,
    /// Result ordering.
    pub sort: SortMode,
    /// Maximum number of records returned; `None` returns everything after `skip`.
    pub limit: Option<usize>,
    /// Records dropped from the front of the sorted result.
    pub skip: usize,
}

/// Immutable view of one collection as of a cutoff instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    collection: String,
    cutoff: DateTime<Utc>,
    records: Vec<Record>,
    comments: HashMap<String, Vec<Comment>>,
}

impl Snapshot {
    /// Keeps the records created at or before `cutoff`, in input order.
    ///
    /// Every kept record starts with an empty comment list.
    pub fn build(
        collection: impl Into<String>,
        cutoff: DateTime<Utc>,
        records: impl IntoIterator<Item = Record>,
    ) -> Self {
        let collection = collection.into();
        let mut seen = 0usize;
        let records: Vec<Record> = records
            .into_iter()
            .inspect(|_| seen += 1)
            .filter(|r| r.created_utc <= cutoff)
            .collect();
        let comments = records
            .iter()
            .map(|r| (r.id.clone(), Vec::new()))
            .collect();
        debug!(
            collection = %collection,
            cutoff = %cutoff,
            seen,
            kept = records.len(),
            "built snapshot"
        );
        Self {
            collection,
            cutoff,
            records,
            comments,
        }
    }

    /// Collection name.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Cutoff instant.
    pub fn cutoff(&self) -> DateTime<Utc> {
        self.cutoff
    }

    /// All records in insertion order.
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if no record passed the cutoff.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in `[start, end]`, sorted and paginated.
    ///
    /// `old` and `top` are stable; `new` is the exact reverse of `old`.
    pub fn query(&self, query: &SnapshotQuery) -> Vec<&Record> {
        let mut selected: Vec<&Record> = self
            .records
            .iter()
            .filter(|r| query.start.map_or(true, |start| r.created_utc >= start))
            .filter(|r| query.end.map_or(true, |end| r.created_utc <= end))
            .collect();

        match query.sort {
            SortMode::Old => selected.sort_by_key(|r| r.created_utc),
            SortMode::New => {
                selected.sort_by_key(|r| r.created_utc);
                selected.reverse();
            }
            SortMode::Top => selected.sort_by(|a, b| b.score.cmp(&a.score)),
        }

        paginate(selected, query.skip, query.limit)
    }

    /// Records ranked by [`hot_score`], highest first. Equal scores keep insertion order.
    pub fn hot(&self, limit: Option<usize>, skip: usize) -> Vec<&Record> {
        let mut ranked: Vec<(f64, &Record)> =
            self.records.iter().map(|r| (hot_score(r), r)).collect();
        ranked.sort_by(|a, b| b.0.total_cmp(&a.0));
        paginate(ranked.into_iter().map(|(_, r)| r).collect(), skip, limit)
    }

    /// Comments of `record_id`, or `None` if the record is unknown.
    pub fn comments(&self, record_id: &str) -> Option<&[Comment]> {
        self.comments.get(record_id).map(Vec::as_slice)
    }
}

/// Hot ranking score, rounded to 7 decimal places.
///
/// `sign(s) * log10(max(|s|, 1)) + (created - HOT_EPOCH_SECS) / HOT_DECAY_SECS`
/// where `s` is [`Record::effective_score`].
pub fn hot_score(record: &Record) -> f64 {
    let score = record.effective_score();
    let sign = score.signum() as f64;
    let order = (score.unsigned_abs().max(1) as f64).log10();
    let age = (record.created_epoch() - HOT_EPOCH_SECS) as f64;
    let raw = sign * order + age / HOT_DECAY_SECS;
    (raw * 1e7).round() / 1e7
}

fn paginate<T>(items: Vec<T>, skip: usize, limit: Option<usize>) -> Vec<T> {
    let take = limit.unwrap_or(usize::MAX);
    items.into_iter().skip(skip).take(take).collect()
}

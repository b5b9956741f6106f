//! Audit log of redo attempts.
//!
//! Entries are ordered by `(timestamp, seq)`. `seq` is assigned by the store
//! when an entry is appended and only ever grows, so it breaks ties between
//! entries sharing a timestamp and makes cursors exact.

use crate::core::Cid;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Mutex;

/// What a redo attempt produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RedoOutcome {
    /// The flagged deal was replaced by `new_deal`.
    Replaced { new_deal: Cid },
    /// The redoer failed.
    Failed { error: String },
}

/// Entry about to be appended. The store assigns its `seq`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewLogEntry {
    pub trigger: Cid,
    pub outcome: RedoOutcome,
    pub timestamp: DateTime<Utc>,
}

/// One stored audit record. Never changes once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub seq: u64,
    pub trigger: Cid,
    pub outcome: RedoOutcome,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn is_error(&self) -> bool {
        matches!(self.outcome, RedoOutcome::Failed { .. })
    }

    /// Id of the deal created by the redo. `None` iff [`is_error`](Self::is_error).
    pub fn result(&self) -> Option<&Cid> {
        match &self.outcome {
            RedoOutcome::Replaced { new_deal } => Some(new_deal),
            RedoOutcome::Failed { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            RedoOutcome::Failed { error } => Some(error),
            RedoOutcome::Replaced { .. } => None,
        }
    }

    /// Cursor that continues a page right after this entry.
    pub fn cursor(&self) -> LogCursor {
        LogCursor::Entry {
            timestamp: self.timestamp,
            seq: self.seq,
        }
    }

    fn key(&self) -> (DateTime<Utc>, u64) {
        (self.timestamp, self.seq)
    }
}

/// Where a log page starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogCursor {
    /// Inclusive time boundary: entries at `t` and beyond, in query direction.
    Time(DateTime<Utc>),
    /// Exclusive position: entries strictly past this one, in query direction.
    Entry { timestamp: DateTime<Utc>, seq: u64 },
}

impl From<DateTime<Utc>> for LogCursor {
    fn from(t: DateTime<Utc>) -> Self {
        LogCursor::Time(t)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Oldest first.
    Ascending,
    /// Newest first.
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogQuery {
    /// `None` starts at the oldest (ascending) or newest (descending) entry.
    pub cursor: Option<LogCursor>,
    pub limit: usize,
    pub direction: Direction,
}

impl LogQuery {
    pub fn ascending(cursor: Option<LogCursor>, limit: usize) -> Self {
        Self {
            cursor,
            limit,
            direction: Direction::Ascending,
        }
    }

    pub fn descending(cursor: Option<LogCursor>, limit: usize) -> Self {
        Self {
            cursor,
            limit,
            direction: Direction::Descending,
        }
    }

    /// Whether `entry` lies inside this query's range, ignoring `limit`.
    pub fn contains(&self, entry: &LogEntry) -> bool {
        let key = entry.key();
        match (self.direction, self.cursor) {
            (_, None) => true,
            (Direction::Ascending, Some(LogCursor::Time(t))) => entry.timestamp >= t,
            (Direction::Ascending, Some(LogCursor::Entry { timestamp, seq })) => {
                key > (timestamp, seq)
            }
            (Direction::Descending, Some(LogCursor::Time(t))) => entry.timestamp <= t,
            (Direction::Descending, Some(LogCursor::Entry { timestamp, seq })) => {
                key < (timestamp, seq)
            }
        }
    }
}

/// Storage for the executor's audit log.
///
/// Implementations must keep entries across restarts if they are used as
/// an audit trail, and must answer range queries in both directions.
#[async_trait]
pub trait LogStore: Send + Sync + 'static {
    /// Append an entry, assigning the next sequence number.
    async fn append(&self, entry: NewLogEntry) -> Result<LogEntry>;

    /// Entries inside `query`, ordered by `(timestamp, seq)` in the query's
    /// direction, at most `query.limit` of them.
    async fn range(&self, query: LogQuery) -> Result<Vec<LogEntry>>;

    /// The newest entry, if any.
    async fn latest(&self) -> Result<Option<LogEntry>> {
        Ok(self
            .range(LogQuery::descending(None, 1))
            .await?
            .into_iter()
            .next())
    }
}

/// In-process [`LogStore`]. Not durable; for tests and demos.
#[derive(Debug, Default)]
pub struct MemoryLogStore {
    inner: Mutex<MemoryLog>,
}

#[derive(Debug, Default)]
struct MemoryLog {
    entries: BTreeMap<(DateTime<Utc>, u64), LogEntry>,
    last_seq: u64,
}

impl MemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every entry, oldest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.inner
            .lock()
            .map(|log| log.entries.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|log| log.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LogStore for MemoryLogStore {
    async fn append(&self, entry: NewLogEntry) -> Result<LogEntry> {
        let mut log = self
            .inner
            .lock()
            .map_err(|_| anyhow!("memory log store poisoned"))?;
        log.last_seq += 1;
        let stored = LogEntry {
            seq: log.last_seq,
            trigger: entry.trigger,
            outcome: entry.outcome,
            timestamp: entry.timestamp,
        };
        log.entries.insert(stored.key(), stored.clone());
        Ok(stored)
    }

    async fn range(&self, query: LogQuery) -> Result<Vec<LogEntry>> {
        let log = self
            .inner
            .lock()
            .map_err(|_| anyhow!("memory log store poisoned"))?;

        let (lower, upper) = match (query.direction, query.cursor) {
            (_, None) => (Bound::Unbounded, Bound::Unbounded),
            (Direction::Ascending, Some(LogCursor::Time(t))) => {
                (Bound::Included((t, 0)), Bound::Unbounded)
            }
            (Direction::Ascending, Some(LogCursor::Entry { timestamp, seq })) => {
                (Bound::Excluded((timestamp, seq)), Bound::Unbounded)
            }
            (Direction::Descending, Some(LogCursor::Time(t))) => {
                (Bound::Unbounded, Bound::Included((t, u64::MAX)))
            }
            (Direction::Descending, Some(LogCursor::Entry { timestamp, seq })) => {
                (Bound::Unbounded, Bound::Excluded((timestamp, seq)))
            }
        };

        let range = log.entries.range((lower, upper)).map(|(_, e)| e.clone());
        let page = match query.direction {
            Direction::Ascending => range.take(query.limit).collect(),
            Direction::Descending => range.rev().take(query.limit).collect(),
        };
        Ok(page)
    }
}

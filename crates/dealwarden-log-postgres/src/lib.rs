//! PostgreSQL implementation of the dealwarden audit log.
//!
//! This crate provides a durable implementation of the `LogStore` trait used
//! by `DealExecutor`.
//!
//! # Features
//!
//! - `BIGSERIAL` sequence numbers assigned at insert time
//! - Range queries in both directions over a `(created_at, seq)` index
//! - Outcome integrity enforced by a table constraint
//! - Retention pruning and summary statistics
//!
//! # Database Schema
//!
//! ```sql
//! CREATE TABLE deal_executor_log (
//!     seq BIGSERIAL PRIMARY KEY,
//!     trigger_cid TEXT NOT NULL,
//!
//!     -- Outcome: exactly one of these is set
//!     result_cid TEXT,
//!     error_message TEXT,
//!
//!     created_at TIMESTAMPTZ NOT NULL,
//!
//!     CONSTRAINT deal_executor_log_outcome
//!         CHECK ((result_cid IS NULL) <> (error_message IS NULL))
//! );
//!
//! CREATE INDEX idx_deal_executor_log_time ON deal_executor_log (created_at, seq);
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use dealwarden_log_postgres::PgLogStore;
//! use sqlx::PgPool;
//!
//! let pool = PgPool::connect("postgres://localhost/dealwarden").await?;
//! let store = PgLogStore::new(pool);
//! store.migrate().await?;
//!
//! let executor = DealExecutor::new(trigger, redoer, Arc::new(store), ExecutorConfig::default());
//! ```

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use dealwarden::{Direction, LogCursor, LogEntry, LogQuery, LogStore, NewLogEntry, RedoOutcome};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tracing::debug;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS deal_executor_log (
    seq BIGSERIAL PRIMARY KEY,
    trigger_cid TEXT NOT NULL,
    result_cid TEXT,
    error_message TEXT,
    created_at TIMESTAMPTZ NOT NULL,
    CONSTRAINT deal_executor_log_outcome
        CHECK ((result_cid IS NULL) <> (error_message IS NULL))
);
CREATE INDEX IF NOT EXISTS idx_deal_executor_log_time
    ON deal_executor_log (created_at, seq);
"#;

/// PostgreSQL audit log store.
#[derive(Clone)]
pub struct PgLogStore {
    pool: PgPool,
}

impl PgLogStore {
    /// Create a new PostgreSQL log store.
    ///
    /// # Arguments
    ///
    /// * `pool` - PostgreSQL connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the log table and index if they don't exist yet.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .context("creating deal_executor_log schema")?;
        Ok(())
    }
}

fn entry_from_row(row: &PgRow) -> Result<LogEntry> {
    let seq: i64 = row.try_get("seq")?;
    let trigger: String = row.try_get("trigger_cid")?;
    let result: Option<String> = row.try_get("result_cid")?;
    let error: Option<String> = row.try_get("error_message")?;
    let timestamp: DateTime<Utc> = row.try_get("created_at")?;

    let outcome = match (result, error) {
        (Some(new_deal), None) => RedoOutcome::Replaced {
            new_deal: new_deal.parse()?,
        },
        (None, Some(error)) => RedoOutcome::Failed { error },
        _ => return Err(anyhow!("log entry {seq} has an inconsistent outcome")),
    };

    Ok(LogEntry {
        seq: u64::try_from(seq)?,
        trigger: trigger.parse()?,
        outcome,
        timestamp,
    })
}

fn to_db_seq(seq: u64) -> i64 {
    i64::try_from(seq).unwrap_or(i64::MAX)
}

/// Append the `WHERE` / `ORDER BY` / `LIMIT` tail for `query`.
fn push_range(builder: &mut QueryBuilder<'_, Postgres>, query: &LogQuery) {
    match (query.direction, query.cursor) {
        (_, None) => {}
        (Direction::Ascending, Some(LogCursor::Time(t))) => {
            builder.push(" WHERE created_at >= ").push_bind(t);
        }
        (Direction::Ascending, Some(LogCursor::Entry { timestamp, seq })) => {
            builder
                .push(" WHERE (created_at, seq) > (")
                .push_bind(timestamp)
                .push(", ")
                .push_bind(to_db_seq(seq))
                .push(")");
        }
        (Direction::Descending, Some(LogCursor::Time(t))) => {
            builder.push(" WHERE created_at <= ").push_bind(t);
        }
        (Direction::Descending, Some(LogCursor::Entry { timestamp, seq })) => {
            builder
                .push(" WHERE (created_at, seq) < (")
                .push_bind(timestamp)
                .push(", ")
                .push_bind(to_db_seq(seq))
                .push(")");
        }
    }

    match query.direction {
        Direction::Ascending => builder.push(" ORDER BY created_at ASC, seq ASC"),
        Direction::Descending => builder.push(" ORDER BY created_at DESC, seq DESC"),
    };

    builder
        .push(" LIMIT ")
        .push_bind(i64::try_from(query.limit).unwrap_or(i64::MAX));
}

#[async_trait]
impl LogStore for PgLogStore {
    /// Insert an entry. Postgres assigns the sequence number.
    ///
    /// `TIMESTAMPTZ` keeps microseconds, so the timestamp is truncated to
    /// that precision and the returned entry matches what range queries see.
    async fn append(&self, entry: NewLogEntry) -> Result<LogEntry> {
        let timestamp = entry.timestamp.trunc_subsecs(6);
        let (result_cid, error_message) = match &entry.outcome {
            RedoOutcome::Replaced { new_deal } => (Some(new_deal.to_string()), None),
            RedoOutcome::Failed { error } => (None, Some(error.clone())),
        };

        let row = sqlx::query(
            r#"
            INSERT INTO deal_executor_log (trigger_cid, result_cid, error_message, created_at)
            VALUES ($1, $2, $3, $4)
            RETURNING seq
            "#,
        )
        .bind(entry.trigger.to_string())
        .bind(result_cid)
        .bind(error_message)
        .bind(timestamp)
        .fetch_one(&self.pool)
        .await?;

        let seq: i64 = row.try_get("seq")?;
        debug!(seq, trigger = %entry.trigger, "log entry stored");

        Ok(LogEntry {
            seq: u64::try_from(seq)?,
            trigger: entry.trigger,
            outcome: entry.outcome,
            timestamp,
        })
    }

    /// Range query over `(created_at, seq)`.
    async fn range(&self, query: LogQuery) -> Result<Vec<LogEntry>> {
        if query.limit == 0 {
            return Ok(Vec::new());
        }

        let mut builder = QueryBuilder::<Postgres>::new(
            "SELECT seq, trigger_cid, result_cid, error_message, created_at FROM deal_executor_log",
        );
        push_range(&mut builder, &query);

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(entry_from_row).collect()
    }
}

/// Maintenance helpers.
impl PgLogStore {
    /// Delete entries written before `older_than`.
    ///
    /// The log is otherwise append-only; only call this from a retention job.
    pub async fn prune_before(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM deal_executor_log
            WHERE created_at < $1
            "#,
        )
        .bind(older_than)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Get summary statistics about the log.
    pub async fn stats(&self) -> Result<LogStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE error_message IS NULL) as succeeded,
                COUNT(*) FILTER (WHERE error_message IS NOT NULL) as failed,
                MAX(created_at) as last_entry_at
            FROM deal_executor_log
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(LogStats {
            succeeded: row.try_get("succeeded")?,
            failed: row.try_get("failed")?,
            last_entry_at: row.try_get("last_entry_at")?,
        })
    }
}

/// Audit log statistics.
#[derive(Debug, Clone, Copy)]
pub struct LogStats {
    pub succeeded: i64,
    pub failed: i64,
    pub last_entry_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sql_for(query: LogQuery) -> String {
        let mut builder = QueryBuilder::<Postgres>::new("SELECT * FROM deal_executor_log");
        push_range(&mut builder, &query);
        builder.sql().to_string()
    }

    #[test]
    fn test_ascending_entry_cursor_is_exclusive_tuple_compare() {
        let sql = sql_for(LogQuery::ascending(
            Some(LogCursor::Entry {
                timestamp: Utc::now(),
                seq: 9,
            }),
            25,
        ));
        assert!(sql.contains("WHERE (created_at, seq) > ($1, $2)"));
        assert!(sql.contains("ORDER BY created_at ASC, seq ASC"));
        assert!(sql.ends_with("LIMIT $3"));
    }

    #[test]
    fn test_descending_time_cursor_is_inclusive() {
        let sql = sql_for(LogQuery::descending(Some(LogCursor::Time(Utc::now())), 5));
        assert!(sql.contains("WHERE created_at <= $1"));
        assert!(sql.contains("ORDER BY created_at DESC, seq DESC"));
    }

    #[test]
    fn test_open_query_has_no_filter() {
        let sql = sql_for(LogQuery::ascending(None, 5));
        assert!(!sql.contains("WHERE"));
        assert!(sql.ends_with("LIMIT $1"));
    }
}

//! Batch destinations.
//!
//! The loader hands each completed batch to a [`RecordSink`]. The PostgreSQL
//! sink writes the whole batch with a single `UNNEST` insert inside its own
//! transaction, so a batch is either fully committed or not at all. Keys that
//! already exist are skipped by `ON CONFLICT ... DO NOTHING`, which makes
//! re-running a load over the same file a no-op for rows already present.

use crate::batch::columns;
use crate::config::TargetConfig;
use crate::error::LoadError;
use crate::record::Record;
use sqlx::{Connection, PgConnection};
use std::future::Future;

/// Destination for flushed batches.
pub trait RecordSink {
    /// Persist `records` atomically and return how many rows were written.
    fn flush(&mut self, records: &[Record])
    -> impl Future<Output = Result<u64, LoadError>> + Send;
}

/// Build the multi-row insert for `target`.
///
/// Identifiers are interpolated, so `target` must have passed
/// [`TargetConfig::validate`].
pub fn insert_statement(target: &TargetConfig) -> String {
    format!(
        r#"INSERT INTO {table} ({key}, {vector})
           SELECT k, v::{vector_type}
           FROM UNNEST($1::text[], $2::text[]) AS t(k, v)
           ON CONFLICT ({key}) DO NOTHING"#,
        table = target.table,
        key = target.key_column,
        vector = target.vector_column,
        vector_type = target.vector_type,
    )
}

/// Writes batches over a single dedicated connection, one transaction per batch.
pub struct PgSink<'c> {
    conn: &'c mut PgConnection,
    insert_sql: String,
}

impl<'c> PgSink<'c> {
    pub fn new(conn: &'c mut PgConnection, target: &TargetConfig) -> Self {
        Self {
            conn,
            insert_sql: insert_statement(target),
        }
    }
}

impl RecordSink for PgSink<'_> {
    async fn flush(&mut self, records: &[Record]) -> Result<u64, LoadError> {
        if records.is_empty() {
            return Ok(0);
        }

        let (keys, vectors) = columns(records);

        let mut tx = self.conn.begin().await?;
        let result = sqlx::query(&self.insert_sql)
            .bind(&keys)
            .bind(&vectors)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        let rows_affected = result.rows_affected();
        if rows_affected < records.len() as u64 {
            log::debug!(
                "flush: tried to insert {} rows, {} inserted ({} already present)",
                records.len(),
                rows_affected,
                records.len() as u64 - rows_affected
            );
        }

        log::trace!("bulk inserted {} rows", rows_affected);
        Ok(rows_affected)
    }
}

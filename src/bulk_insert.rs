use std::{mem, sync::Arc};

use tracing::{debug, error};

use crate::{
    client::PostgresError,
    executor::Executor,
    query_builder::{quote_identifier, quote_identifiers},
    value::SqlValue,
};

pub const DEFAULT_MAX_BUFFER_SIZE: usize = 250;

#[derive(thiserror::Error, Debug)]
pub enum BulkInsertError {
    #[error(
        "Record for table '{table}' has {} values but {} columns are declared",
        .record.len(),
        .columns.len()
    )]
    ValueCountMismatch { table: String, columns: Vec<String>, record: Vec<SqlValue> },

    #[error(
        "Bulk inserter for table '{table}' was closed without emptying its buffer of {} records",
        .records.len()
    )]
    BufferNotEmptied { table: String, records: Vec<Vec<SqlValue>> },

    #[error("{0}")]
    Postgres(#[from] PostgresError),
}

/// Buffers fixed-shape records and writes them out as multi-row INSERT
/// statements once the buffer fills, so large loads cost one round trip per
/// batch instead of one per row.
///
/// Records left under the threshold stay buffered until
/// [`insert_records`](BulkInserter::insert_records) or
/// [`flush`](BulkInserter::flush) drains them. The buffer must be drained (or
/// explicitly discarded with [`destroy_buffer`](BulkInserter::destroy_buffer))
/// before the inserter is closed or dropped; pending records at teardown are
/// reported loudly rather than silently lost.
pub struct BulkInserter {
    executor: Arc<dyn Executor>,
    table_name: String,
    columns: Vec<String>,
    max_buffer_size: usize,
    records: Vec<Vec<SqlValue>>,
}

impl BulkInserter {
    /// # Panics
    ///
    /// Panics if `max_buffer_size` is zero.
    pub fn new(
        executor: Arc<dyn Executor>,
        table_name: &str,
        columns: &[&str],
        max_buffer_size: usize,
    ) -> Self {
        assert!(max_buffer_size > 0, "max_buffer_size must be greater than zero");

        Self {
            executor,
            table_name: table_name.to_string(),
            columns: columns.iter().map(|column| column.to_string()).collect(),
            max_buffer_size,
            records: Vec::new(),
        }
    }

    /// Number of records currently buffered, always below the threshold.
    pub fn pending(&self) -> usize {
        self.records.len()
    }

    pub async fn buffer_record(&mut self, record: Vec<SqlValue>) -> Result<(), BulkInsertError> {
        self.buffer_records(vec![record]).await
    }

    /// Buffers records one at a time, writing the buffer out every time it
    /// reaches the threshold. A single large call may flush several times;
    /// any remainder below the threshold stays buffered.
    pub async fn buffer_records(
        &mut self,
        records: Vec<Vec<SqlValue>>,
    ) -> Result<(), BulkInsertError> {
        for record in records {
            if record.len() != self.columns.len() {
                return Err(BulkInsertError::ValueCountMismatch {
                    table: self.table_name.clone(),
                    columns: self.columns.clone(),
                    record,
                });
            }

            self.records.push(record);

            if self.records.len() >= self.max_buffer_size {
                self.flush().await?;
            }
        }

        Ok(())
    }

    /// Buffers `additional_records` and then writes out everything pending,
    /// regardless of how full the buffer is.
    pub async fn insert_records(
        &mut self,
        additional_records: Vec<Vec<SqlValue>>,
    ) -> Result<(), BulkInsertError> {
        self.buffer_records(additional_records).await?;
        self.flush().await
    }

    /// Writes any pending records as a single multi-row INSERT and clears the
    /// buffer. Performs no driver call when the buffer is empty. The buffer
    /// is left intact if the driver reports a failure.
    pub async fn flush(&mut self) -> Result<(), BulkInsertError> {
        if self.records.is_empty() {
            return Ok(());
        }

        let sql = self.build_insert_sql();
        debug!("bulk insert statement: {}", sql);

        let params: Vec<SqlValue> = self.records.iter().flatten().cloned().collect();
        self.executor.execute(&sql, &params).await?;
        self.records.clear();

        Ok(())
    }

    /// Discards everything pending without writing it. The explicit escape
    /// hatch, as opposed to silently losing data at teardown.
    pub fn destroy_buffer(&mut self) {
        self.records.clear();
    }

    /// Verifies the buffer was emptied. Call this after the final flush so a
    /// forgotten drain surfaces as an error carrying the unflushed records
    /// instead of a log line from `Drop`.
    pub fn close(mut self) -> Result<(), BulkInsertError> {
        let records = mem::take(&mut self.records);
        if records.is_empty() {
            return Ok(());
        }

        Err(BulkInsertError::BufferNotEmptied { table: self.table_name.clone(), records })
    }

    fn build_insert_sql(&self) -> String {
        let column_count = self.columns.len();

        let mut lines = Vec::with_capacity(self.records.len());
        for row in 0..self.records.len() {
            let mut placeholders = Vec::with_capacity(column_count);
            for column in 0..column_count {
                placeholders.push(format!("${}", row * column_count + column + 1));
            }
            lines.push(format!("({})", placeholders.join(",")));
        }

        format!(
            "INSERT INTO {} ({}) VALUES {}",
            quote_identifier(&self.table_name),
            quote_identifiers(&self.columns),
            lines.join(", "),
        )
    }
}

impl Drop for BulkInserter {
    fn drop(&mut self) {
        if self.records.is_empty() {
            return;
        }

        error!(
            "bulk inserter for table '{}' dropped with {} unflushed records",
            self.table_name,
            self.records.len()
        );

        if cfg!(debug_assertions) && !std::thread::panicking() {
            panic!(
                "bulk inserter for table '{}' dropped with unflushed records",
                self.table_name
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeExecutor;

    fn inserter(max_buffer_size: usize) -> (Arc<FakeExecutor>, BulkInserter) {
        let executor = Arc::new(FakeExecutor::new());
        let inserter =
            BulkInserter::new(executor.clone(), "scores", &["a", "b"], max_buffer_size);
        (executor, inserter)
    }

    fn record(a: i32, b: i32) -> Vec<SqlValue> {
        vec![SqlValue::Int(a), SqlValue::Int(b)]
    }

    #[tokio::test]
    async fn filling_the_buffer_flushes_once_with_every_record() {
        let (executor, mut inserter) = inserter(3);

        inserter.buffer_record(record(4, 5)).await.unwrap();
        inserter.buffer_record(record(102, 32)).await.unwrap();
        assert!(executor.statements().is_empty());

        inserter.buffer_record(record(43, 12)).await.unwrap();

        let statements = executor.statements();
        assert_eq!(statements.len(), 1);
        assert_eq!(
            statements[0].0,
            "INSERT INTO \"scores\" (\"a\", \"b\") VALUES ($1,$2), ($3,$4), ($5,$6)"
        );
        assert_eq!(
            statements[0].1,
            vec![
                SqlValue::Int(4),
                SqlValue::Int(5),
                SqlValue::Int(102),
                SqlValue::Int(32),
                SqlValue::Int(43),
                SqlValue::Int(12),
            ]
        );
        assert_eq!(inserter.pending(), 0);
        inserter.close().unwrap();
    }

    #[tokio::test]
    async fn overflowing_records_stay_buffered_below_the_threshold() {
        let (executor, mut inserter) = inserter(3);

        inserter
            .buffer_records(vec![
                record(1, 2),
                record(3, 4),
                record(5, 6),
                record(7, 8),
                record(9, 10),
            ])
            .await
            .unwrap();

        // one flush at the threshold, the remainder is still pending
        assert_eq!(executor.statements().len(), 1);
        assert_eq!(inserter.pending(), 2);

        inserter.destroy_buffer();
        inserter.close().unwrap();
    }

    #[tokio::test]
    async fn one_call_can_trigger_several_flushes() {
        let (executor, mut inserter) = inserter(2);

        inserter
            .insert_records(vec![
                record(1, 2),
                record(3, 4),
                record(5, 6),
                record(7, 8),
                record(9, 10),
            ])
            .await
            .unwrap();

        let sql = executor.sql();
        assert_eq!(sql.len(), 3);
        assert_eq!(sql[0], "INSERT INTO \"scores\" (\"a\", \"b\") VALUES ($1,$2), ($3,$4)");
        assert_eq!(sql[1], "INSERT INTO \"scores\" (\"a\", \"b\") VALUES ($1,$2), ($3,$4)");
        assert_eq!(sql[2], "INSERT INTO \"scores\" (\"a\", \"b\") VALUES ($1,$2)");
        assert_eq!(inserter.pending(), 0);
        inserter.close().unwrap();
    }

    #[tokio::test]
    async fn inserting_nothing_performs_no_driver_calls() {
        let (executor, mut inserter) = inserter(3);

        inserter.insert_records(Vec::new()).await.unwrap();

        assert!(executor.statements().is_empty());
        inserter.close().unwrap();
    }

    #[tokio::test]
    async fn insert_records_drains_a_partial_buffer() {
        let (executor, mut inserter) = inserter(100);

        inserter
            .insert_records(vec![record(4, 5), record(102, 32), record(43, 12)])
            .await
            .unwrap();

        let statements = executor.statements();
        assert_eq!(statements.len(), 1);
        assert_eq!(
            statements[0].0,
            "INSERT INTO \"scores\" (\"a\", \"b\") VALUES ($1,$2), ($3,$4), ($5,$6)"
        );
        assert_eq!(
            statements[0].1,
            vec![
                SqlValue::Int(4),
                SqlValue::Int(5),
                SqlValue::Int(102),
                SqlValue::Int(32),
                SqlValue::Int(43),
                SqlValue::Int(12),
            ]
        );
        inserter.close().unwrap();
    }

    #[tokio::test]
    async fn a_record_with_the_wrong_arity_is_rejected() {
        let (executor, mut inserter) = inserter(10);

        inserter.buffer_record(record(1, 2)).await.unwrap();

        let result = inserter.buffer_record(vec![SqlValue::Int(3)]).await;
        match result {
            Err(BulkInsertError::ValueCountMismatch { table, columns, record }) => {
                assert_eq!(table, "scores");
                assert_eq!(columns, vec!["a".to_string(), "b".to_string()]);
                assert_eq!(record, vec![SqlValue::Int(3)]);
            }
            other => panic!("expected ValueCountMismatch, got {:?}", other),
        }

        // previously buffered records are untouched
        assert_eq!(inserter.pending(), 1);
        assert!(executor.statements().is_empty());

        inserter.destroy_buffer();
        inserter.close().unwrap();
    }

    #[tokio::test]
    async fn closing_with_pending_records_returns_them() {
        let (_executor, mut inserter) = inserter(10);

        inserter.buffer_record(record(1, 2)).await.unwrap();

        match inserter.close() {
            Err(BulkInsertError::BufferNotEmptied { table, records }) => {
                assert_eq!(table, "scores");
                assert_eq!(records, vec![record(1, 2)]);
            }
            other => panic!("expected BufferNotEmptied, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn destroying_the_buffer_makes_closing_clean() {
        let (executor, mut inserter) = inserter(10);

        inserter.buffer_record(record(1, 2)).await.unwrap();
        inserter.destroy_buffer();

        inserter.close().unwrap();
        assert!(executor.statements().is_empty());
    }

    #[tokio::test]
    async fn a_large_load_is_split_into_threshold_sized_batches() {
        let (executor, mut inserter) = inserter(250);

        let mut records = Vec::new();
        for i in 0..1000 {
            records.push(record(i, i * 2));
        }
        inserter.insert_records(records).await.unwrap();

        let statements = executor.statements();
        assert_eq!(statements.len(), 4);
        for (sql, params) in &statements {
            assert_eq!(params.len(), 500);
            assert!(sql.ends_with("($499,$500)"));
        }
        assert_eq!(statements[0].1[0], SqlValue::Int(0));
        assert_eq!(statements[3].1[498], SqlValue::Int(999));
        inserter.close().unwrap();
    }

    #[tokio::test]
    async fn identifiers_are_quoted_in_the_generated_statement() {
        let executor = Arc::new(FakeExecutor::new());
        let mut inserter =
            BulkInserter::new(executor.clone(), "say \"what\"", &["select"], 1);

        inserter.buffer_record(vec![SqlValue::Int(1)]).await.unwrap();

        assert_eq!(
            executor.sql(),
            vec!["INSERT INTO \"say \"\"what\"\"\" (\"select\") VALUES ($1)"]
        );
        inserter.close().unwrap();
    }

    #[tokio::test]
    #[should_panic(expected = "unflushed records")]
    async fn dropping_a_non_empty_buffer_panics_in_debug_builds() {
        let (_executor, mut inserter) = inserter(10);
        inserter.buffer_record(record(1, 2)).await.unwrap();
        drop(inserter);
    }

    #[test]
    #[should_panic(expected = "greater than zero")]
    fn a_zero_buffer_size_is_rejected() {
        let executor = Arc::new(FakeExecutor::new());
        let _ = BulkInserter::new(executor, "scores", &["a"], 0);
    }
}

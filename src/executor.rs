use async_trait::async_trait;

use crate::{client::PostgresError, value::SqlValue};

/// The minimal statement-execution surface shared by the transaction
/// coordinator and the bulk inserter. [`Database`](crate::Database) is the
/// production implementation; tests substitute a recording fake.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Prepares and runs a single statement with positional parameters,
    /// returning the number of rows affected.
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64, PostgresError>;

    /// Runs raw SQL outside the prepared-statement path, permitting multiple
    /// semicolon-separated statements in one call.
    async fn batch_execute(&self, sql: &str) -> Result<(), PostgresError>;
}

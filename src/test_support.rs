use std::sync::Mutex;

use async_trait::async_trait;

use crate::{client::PostgresError, executor::Executor, value::SqlValue};

/// Records every statement it is asked to run, standing in for a live
/// connection in unit tests.
#[derive(Default)]
pub struct FakeExecutor {
    statements: Mutex<Vec<(String, Vec<SqlValue>)>>,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn statements(&self) -> Vec<(String, Vec<SqlValue>)> {
        self.statements.lock().unwrap().clone()
    }

    pub fn sql(&self) -> Vec<String> {
        self.statements.lock().unwrap().iter().map(|(sql, _)| sql.clone()).collect()
    }
}

#[async_trait]
impl Executor for FakeExecutor {
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64, PostgresError> {
        self.statements.lock().unwrap().push((sql.to_string(), params.to_vec()));
        Ok(params.len() as u64)
    }

    async fn batch_execute(&self, sql: &str) -> Result<(), PostgresError> {
        self.statements.lock().unwrap().push((sql.to_string(), Vec::new()));
        Ok(())
    }
}

use std::{collections::HashSet, sync::Arc};

use tracing::debug;

use crate::{client::PostgresError, executor::Executor};

#[derive(thiserror::Error, Debug)]
pub enum TransactionError {
    #[error("Transaction name '{0}' is already active")]
    DuplicateName(String),

    #[error("Transaction name '{0}' was never begun and therefore cannot be accepted")]
    UnknownName(String),

    #[error("Transaction name '{actual}' cannot be accepted before transaction name '{expected}'")]
    AcceptanceOrder { expected: String, actual: String },

    #[error("{0}")]
    Postgres(#[from] PostgresError),
}

/// Multiplexes independently named logical transactions over a single
/// physical transaction on one connection.
///
/// Each piece of application code wraps its work in a named section with
/// [`begin`](Transaction::begin) and [`accept`](Transaction::accept) without
/// needing to know whether a caller further up already opened one: only the
/// outermost `begin` issues a physical BEGIN and only the final `accept`
/// issues a COMMIT. Names must be accepted in the reverse order they were
/// begun, and any participant can abandon the whole unit with
/// [`rollback_all`](Transaction::rollback_all).
pub struct Transaction {
    executor: Arc<dyn Executor>,
    active: HashSet<String>,
    stack: Vec<String>,
}

impl Transaction {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self { executor, active: HashSet::new(), stack: Vec::new() }
    }

    /// The most recently begun name that has not yet been accepted.
    pub fn current(&self) -> Option<&str> {
        self.stack.last().map(String::as_str)
    }

    /// Whether a physical transaction is currently open on the connection.
    pub fn is_open(&self) -> bool {
        !self.stack.is_empty()
    }

    /// Opens a named section, issuing a physical BEGIN only if no section is
    /// active yet.
    pub async fn begin(&mut self, name: &str) -> Result<(), TransactionError> {
        if self.active.contains(name) {
            return Err(TransactionError::DuplicateName(name.to_string()));
        }

        if self.stack.is_empty() {
            self.executor.batch_execute("BEGIN").await?;
        }

        self.active.insert(name.to_string());
        self.stack.push(name.to_string());
        debug!("began transaction section '{}'", name);

        Ok(())
    }

    /// Marks a named section as agreed, issuing a physical COMMIT once every
    /// active name has been accepted. Sections must be accepted in exactly
    /// the reverse order of their `begin` calls.
    pub async fn accept(&mut self, name: &str) -> Result<(), TransactionError> {
        if !self.active.contains(name) {
            return Err(TransactionError::UnknownName(name.to_string()));
        }

        let expected = match self.stack.last() {
            Some(expected) => expected,
            None => return Err(TransactionError::UnknownName(name.to_string())),
        };
        if expected != name {
            return Err(TransactionError::AcceptanceOrder {
                expected: expected.clone(),
                actual: name.to_string(),
            });
        }

        self.stack.pop();
        self.active.remove(name);
        debug!("accepted transaction section '{}'", name);

        if self.stack.is_empty() {
            self.executor.batch_execute("COMMIT").await?;
        }

        Ok(())
    }

    /// Abandons every active section and rolls the physical transaction back.
    /// Does nothing when no section is active.
    pub async fn rollback_all(&mut self) -> Result<(), TransactionError> {
        if self.stack.is_empty() {
            return Ok(());
        }

        self.active.clear();
        self.stack.clear();

        self.executor.batch_execute("ROLLBACK").await?;

        Ok(())
    }
}

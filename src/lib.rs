mod bulk_insert;
mod client;
mod executor;
mod logger;
mod query_builder;
mod transaction;
mod value;

#[cfg(test)]
mod test_support;

pub use bulk_insert::{BulkInsertError, BulkInserter, DEFAULT_MAX_BUFFER_SIZE};
pub use client::{
    connection_string, Database, PostgresConnectionError, PostgresError,
};
pub use executor::Executor;
pub use logger::{setup_info_logger, setup_logger};
pub use query_builder::{quote_identifier, Assignment};
pub use transaction::{Transaction, TransactionError};
pub use value::{SqlParam, SqlValue};

// export 3rd party dependencies
pub use futures::StreamExt;
pub use tokio_postgres::types::{ToSql, Type as PgType};
pub use tokio_postgres::Row;
pub use tracing::{error as pgkit_error, info as pgkit_info};

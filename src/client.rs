use std::{env, sync::Arc, time::Duration};

use async_trait::async_trait;
use dotenv::dotenv;
use futures::{Stream, TryStreamExt};
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use tokio::{
    sync::{Mutex, MutexGuard},
    task,
    time::timeout,
};
use tokio_postgres::{
    config::SslMode, types::ToSql, Config, Error as PgError, Row,
};
use tracing::{error, info};

use crate::{
    bulk_insert::{BulkInserter, DEFAULT_MAX_BUFFER_SIZE},
    executor::Executor,
    query_builder::{build_delete, build_insert, build_update, Assignment},
    transaction::Transaction,
    value::{SqlParam, SqlValue},
};

pub fn connection_string() -> Result<String, env::VarError> {
    dotenv().ok();
    let connection = env::var("DATABASE_URL")?;
    Ok(connection)
}

#[derive(thiserror::Error, Debug)]
pub enum PostgresConnectionError {
    #[error("The database connection string is wrong please check your environment: {0}")]
    DatabaseConnectionConfigWrong(#[from] env::VarError),

    #[error("Can not connect to the database please make sure your connection string is correct")]
    CanNotConnectToDatabase,

    #[error("Could not parse connection string make sure it is correctly formatted")]
    CouldNotParseConnectionString,

    #[error("Could not create tls connector")]
    CouldNotCreateTlsConnector,
}

#[derive(thiserror::Error, Debug)]
pub enum PostgresError {
    #[error("PgError {0}")]
    PgError(#[from] PgError),

    #[error("No value was bound for placeholder ':{0}'")]
    MissingParameter(String),
}

fn to_sql_refs(params: &[SqlValue]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|param| param as &(dyn ToSql + Sync)).collect()
}

/// Owns the one physical connection a [`Database`] handle multiplexes over.
struct PgDriver {
    client: tokio_postgres::Client,
    _connection: task::JoinHandle<()>,
}

#[async_trait]
impl Executor for PgDriver {
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64, PostgresError> {
        let params_refs = to_sql_refs(params);
        self.client.execute(sql, &params_refs).await.map_err(PostgresError::PgError)
    }

    async fn batch_execute(&self, sql: &str) -> Result<(), PostgresError> {
        self.client.batch_execute(sql).await.map_err(PostgresError::PgError)
    }
}

/// A thin convenience handle over a single tokio-postgres connection.
///
/// Beyond the usual execute/query surface it hands out the per-handle
/// named-transaction coordinator ([`transaction`](Database::transaction)) and
/// bulk inserters ([`bulk_inserter`](Database::bulk_inserter)), and provides
/// small insert/update/delete helpers with named-placeholder binding.
pub struct Database {
    driver: Arc<PgDriver>,
    transaction: Mutex<Transaction>,
}

impl Database {
    /// Connects using the `DATABASE_URL` environment variable.
    pub async fn connect() -> Result<Self, PostgresConnectionError> {
        let connection_str = connection_string()?;
        Self::connect_to(&connection_str).await
    }

    /// Connects to an explicit connection string.
    pub async fn connect_to(connection_str: &str) -> Result<Self, PostgresConnectionError> {
        async fn connect_inner(
            connection_str: &str,
            disable_ssl: bool,
        ) -> Result<Database, PostgresConnectionError> {
            let mut config: Config = connection_str
                .parse()
                .map_err(|_| PostgresConnectionError::CouldNotParseConnectionString)?;

            if disable_ssl {
                config.ssl_mode(SslMode::Disable);
            }

            let connector = TlsConnector::builder()
                .build()
                .map_err(|_| PostgresConnectionError::CouldNotCreateTlsConnector)?;
            let tls_connector = MakeTlsConnector::new(connector);

            let (client, connection) =
                match timeout(Duration::from_millis(5000), config.connect(tls_connector)).await
                {
                    Ok(Ok((client, connection))) => (client, connection),
                    Ok(Err(e)) => {
                        // retry without ssl if ssl has been attempted and failed
                        if !disable_ssl &&
                            config.get_ssl_mode() != SslMode::Disable &&
                            !connection_str.contains("sslmode=require")
                        {
                            return Box::pin(connect_inner(connection_str, true)).await;
                        }
                        error!("Error connecting to database: {}", e);
                        return Err(PostgresConnectionError::CanNotConnectToDatabase);
                    }
                    Err(e) => {
                        error!("Timeout connecting to database: {}", e);
                        return Err(PostgresConnectionError::CanNotConnectToDatabase);
                    }
                };

            let connection_task = task::spawn(async move {
                if let Err(e) = connection.await {
                    error!("Database connection error: {}", e);
                }
            });

            info!("Connected to postgres database");

            let driver = Arc::new(PgDriver { client, _connection: connection_task });
            let transaction = Mutex::new(Transaction::new(driver.clone()));

            Ok(Database { driver, transaction })
        }

        connect_inner(connection_str, false).await
    }

    /// The underlying tokio-postgres client, for anything this layer does not
    /// cover.
    pub fn client(&self) -> &tokio_postgres::Client {
        &self.driver.client
    }

    /// The named-transaction coordinator for this handle. All transaction
    /// control must go through the returned coordinator; issuing
    /// BEGIN/COMMIT/ROLLBACK around it leaves the coordinator and the
    /// connection out of sync.
    pub async fn transaction(&self) -> MutexGuard<'_, Transaction> {
        self.transaction.lock().await
    }

    /// A bulk inserter for `table_name` with the default buffer size.
    pub fn bulk_inserter(&self, table_name: &str, columns: &[&str]) -> BulkInserter {
        self.bulk_inserter_with_capacity(table_name, columns, DEFAULT_MAX_BUFFER_SIZE)
    }

    pub fn bulk_inserter_with_capacity(
        &self,
        table_name: &str,
        columns: &[&str],
        max_buffer_size: usize,
    ) -> BulkInserter {
        BulkInserter::new(self.driver.clone(), table_name, columns, max_buffer_size)
    }

    pub async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64, PostgresError> {
        self.driver.execute(sql, params).await
    }

    /// Runs raw SQL, permitting multiple semicolon-separated statements in
    /// one call.
    pub async fn batch_execute(&self, sql: &str) -> Result<(), PostgresError> {
        self.driver.batch_execute(sql).await
    }

    pub async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>, PostgresError> {
        let params_refs = to_sql_refs(params);
        let rows =
            self.driver.client.query(sql, &params_refs).await.map_err(PostgresError::PgError)?;
        Ok(rows)
    }

    pub async fn query_one(&self, sql: &str, params: &[SqlValue]) -> Result<Row, PostgresError> {
        let params_refs = to_sql_refs(params);
        let row =
            self.driver.client.query_one(sql, &params_refs).await.map_err(PostgresError::PgError)?;
        Ok(row)
    }

    pub async fn query_opt(
        &self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<Option<Row>, PostgresError> {
        let params_refs = to_sql_refs(params);
        let row =
            self.driver.client.query_opt(sql, &params_refs).await.map_err(PostgresError::PgError)?;
        Ok(row)
    }

    /// A lazy, forward-only stream of rows, for result sets not worth
    /// materializing with [`query`](Database::query).
    pub async fn query_stream(
        &self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<impl Stream<Item = Result<Row, PostgresError>>, PostgresError> {
        let stream = self
            .driver
            .client
            .query_raw(sql, params.iter())
            .await
            .map_err(PostgresError::PgError)?;
        Ok(stream.map_err(PostgresError::PgError))
    }

    /// The current value of a sequence, as advanced by inserts on this
    /// connection.
    pub async fn last_insert_id(&self, sequence_name: &str) -> Result<i64, PostgresError> {
        let row = self
            .query_one(
                "SELECT CURRVAL($1::regclass)",
                &[SqlValue::Text(sequence_name.to_string())],
            )
            .await?;
        let id: i64 = row.try_get(0).map_err(PostgresError::PgError)?;
        Ok(id)
    }

    /// Builds and runs an INSERT with one placeholder per column. Raw
    /// expressions are inlined instead of bound.
    pub async fn insert(
        &self,
        table: &str,
        values: &[(&str, SqlParam)],
    ) -> Result<u64, PostgresError> {
        let (sql, params) = build_insert(table, values)?;
        self.driver.execute(&sql, &params).await
    }

    /// Builds and runs an UPDATE. The WHERE clause is caller-supplied raw SQL
    /// whose named placeholders are bound from the same value mapping as the
    /// SET clause.
    pub async fn update(
        &self,
        table: &str,
        assignments: &[Assignment<'_>],
        where_sql: &str,
        values: &[(&str, SqlParam)],
    ) -> Result<u64, PostgresError> {
        let (sql, params) = build_update(table, assignments, where_sql, values)?;
        self.driver.execute(&sql, &params).await
    }

    pub async fn delete(
        &self,
        table: &str,
        where_sql: &str,
        values: &[(&str, SqlParam)],
    ) -> Result<u64, PostgresError> {
        let (sql, params) = build_delete(table, where_sql, values)?;
        self.driver.execute(&sql, &params).await
    }
}

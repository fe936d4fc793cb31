//! Connection providers for tableq.
//!
//! This module defines the [`Store`] trait: one live connection to a relational
//! database, able to run statements, run parameterised queries and re-establish
//! itself. The queue engine issues every read and write through it.
//!
//! Backends (each behind its cargo feature):
//! - [`sqlite::SqliteStore`]
//! - [`postgres::PostgresStore`]
//! - [`mysql::MySqlStore`]
//!
//! [`AnyStore`] selects one of them at runtime from the DSN.

use crate::dialect::Dialect;
use crate::error::{Error, Result};
use async_trait::async_trait;
use sqlx::error::DatabaseError;
use sqlx::query::Query;
use sqlx::{ColumnIndex, ConnectOptions, Connection, Database, Decode, Encode, FromRow, Row, Type};
use std::time::Duration;

pub mod any;
#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use any::AnyStore;

/// Statement used to probe a connection.
pub(crate) const PROBE_SQL: &str = "SELECT 1";

/// A bind parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    Int(i64),
    Text(String),
}

/// The columns of a queue row the engine reads back.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct MessageRow {
    pub id: i64,
    pub payload: String,
    pub failures: i64,
}

/// A single connection to the backing database.
///
/// Every method takes `&mut self`: a store is one connection, owned by one queue
/// engine and never shared. Implementations report a statement that hit a
/// nonexistent table as [`crate::Error::MissingTable`].
#[async_trait]
pub trait Store: Send + 'static {
    /// Platform name of the connected backend ("sqlite", "postgres", "mysql").
    fn backend_name(&self) -> &'static str;

    /// SQL dialect matching [`Store::backend_name`].
    fn dialect(&self) -> Result<Dialect> {
        Dialect::from_backend_name(self.backend_name())
    }

    /// Cheap round trip proving the connection is alive.
    async fn ping(&mut self) -> Result<()>;

    /// Replace the connection with a freshly opened one.
    async fn reconnect(&mut self) -> Result<()>;

    /// Execute a statement, returning the number of affected rows.
    async fn execute(&mut self, sql: &str, args: &[Arg]) -> Result<u64>;

    /// Run a query returning `id, payload, failures` rows.
    async fn fetch_messages(&mut self, sql: &str, args: &[Arg]) -> Result<Vec<MessageRow>>;

    /// Run a query returning at most one row with a single integer column.
    async fn fetch_optional_i64(&mut self, sql: &str, args: &[Arg]) -> Result<Option<i64>>;
}

// ===== Helpers shared by the sqlx backends =====

/// Open a connection, giving up after `timeout`.
pub(crate) async fn open<O>(options: &O, timeout: Duration, backend: &str) -> Result<O::Connection>
where
    O: ConnectOptions,
    O::Connection: Sized,
{
    match tokio::time::timeout(timeout, options.connect()).await {
        Ok(Ok(conn)) => Ok(conn),
        Ok(Err(e)) => Err(Error::ConnectionFailed {
            source: Box::new(e),
            context: format!("Failed to connect to {}", backend),
        }),
        Err(elapsed) => Err(Error::ConnectionFailed {
            source: Box::new(elapsed),
            context: format!("Timed out after {:?} connecting to {}", timeout, backend),
        }),
    }
}

/// Swap `conn` for a freshly opened connection and close the old one best-effort.
pub(crate) async fn replace_connection<O>(
    conn: &mut O::Connection,
    options: &O,
    timeout: Duration,
    backend: &str,
) -> Result<()>
where
    O: ConnectOptions,
    O::Connection: Sized,
{
    let fresh = open(options, timeout, backend).await?;
    let stale = std::mem::replace(conn, fresh);
    if let Err(e) = stale.close().await {
        tracing::debug!("Ignoring error while closing stale {} connection: {}", backend, e);
    }
    Ok(())
}

/// Prepare `sql` with `args` bound in order.
pub(crate) fn bind<'q, DB>(sql: &'q str, args: &[Arg]) -> Query<'q, DB, <DB as Database>::Arguments<'q>>
where
    DB: Database,
    i64: Encode<'q, DB> + Type<DB>,
    String: Encode<'q, DB> + Type<DB>,
{
    let mut query = sqlx::query(sql);
    for arg in args {
        query = match arg {
            Arg::Int(value) => query.bind(*value),
            Arg::Text(value) => query.bind(value.clone()),
        };
    }
    query
}

pub(crate) fn message_rows<R>(rows: Vec<R>) -> Result<Vec<MessageRow>>
where
    R: Row,
    for<'r> MessageRow: FromRow<'r, R>,
{
    let mut messages = Vec::with_capacity(rows.len());
    for row in &rows {
        messages.push(MessageRow::from_row(row)?);
    }
    Ok(messages)
}

/// First column of an optional row, as an integer.
pub(crate) fn first_i64<R>(row: Option<R>) -> Result<Option<i64>>
where
    R: Row,
    usize: ColumnIndex<R>,
    for<'r> i64: Decode<'r, R::Database> + Type<R::Database>,
{
    match row {
        Some(row) => Ok(Some(row.try_get::<i64, _>(0)?)),
        None => Ok(None),
    }
}

/// Wrap a driver error, classifying "table does not exist" with the backend's check.
pub(crate) fn query_error(
    err: sqlx::Error,
    sql: &str,
    context: &str,
    is_missing_table: fn(&dyn DatabaseError) -> bool,
) -> Error {
    let missing_table = matches!(&err, sqlx::Error::Database(db) if is_missing_table(db.as_ref()));
    if missing_table {
        Error::MissingTable {
            source: Box::new(err),
            query: sql.to_string(),
        }
    } else {
        Error::QueryFailed {
            source: Box::new(err),
            query: sql.to_string(),
            context: context.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    #[cfg(feature = "sqlite")]
    Sqlite,
    #[cfg(feature = "postgres")]
    Postgres,
    #[cfg(feature = "mysql")]
    MySql,
}

impl BackendType {
    const POSTGRES_PREFIXES: &'static [&'static str] = &["postgres://", "postgresql://"];
    const SQLITE_PREFIXES: &'static [&'static str] = &["sqlite://", "sqlite:"];
    const MYSQL_PREFIXES: &'static [&'static str] = &["mysql://", "mariadb://"];

    pub fn detect(dsn: &str) -> Result<Self> {
        if Self::SQLITE_PREFIXES.iter().any(|p| dsn.starts_with(p)) {
            #[cfg(feature = "sqlite")]
            return Ok(Self::Sqlite);

            #[cfg(not(feature = "sqlite"))]
            return Err(crate::error::Error::InvalidConfig {
                field: "dsn".to_string(),
                message: "Sqlite backend is not enabled".to_string(),
            });
        }

        if Self::POSTGRES_PREFIXES.iter().any(|p| dsn.starts_with(p)) {
            #[cfg(feature = "postgres")]
            return Ok(Self::Postgres);

            #[cfg(not(feature = "postgres"))]
            return Err(crate::error::Error::InvalidConfig {
                field: "dsn".to_string(),
                message: "Postgres backend is not enabled".to_string(),
            });
        }

        if Self::MYSQL_PREFIXES.iter().any(|p| dsn.starts_with(p)) {
            #[cfg(feature = "mysql")]
            return Ok(Self::MySql);

            #[cfg(not(feature = "mysql"))]
            return Err(crate::error::Error::InvalidConfig {
                field: "dsn".to_string(),
                message: "MySQL backend is not enabled".to_string(),
            });
        }

        Err(crate::error::Error::InvalidConfig {
            field: "dsn".to_string(),
            message: format!("Unsupported DSN format: {}", dsn),
        })
    }
}

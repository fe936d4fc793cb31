use crate::config::Config;
use crate::error::{Error, Result};
use crate::store::{
    bind, first_i64, message_rows, open, query_error, replace_connection, Arg, MessageRow, Store,
    PROBE_SQL,
};
use async_trait::async_trait;
use sqlx::error::DatabaseError;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteJournalMode};
use sqlx::Sqlite;
use std::str::FromStr;
use std::time::Duration;

const BACKEND: &str = "sqlite";

/// How long a writer waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// A single SQLite connection.
///
/// Opened with WAL journaling and a busy timeout so several processes can share
/// one database file. An in-memory database (`sqlite::memory:`) lives only as long
/// as its connection: [`Store::reconnect`] starts over with an empty one.
#[derive(Debug)]
pub struct SqliteStore {
    conn: SqliteConnection,
    options: SqliteConnectOptions,
    connect_timeout: Duration,
}

impl SqliteStore {
    pub async fn new(dsn: &str, config: &Config) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(dsn)
            .map_err(|e| Error::InvalidConfig {
                field: "dsn".to_string(),
                message: format!("Invalid SQLite DSN: {}", e),
            })?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);
        let connect_timeout = config.connection_timeout();
        let conn = open(&options, connect_timeout, BACKEND).await?;

        Ok(Self {
            conn,
            options,
            connect_timeout,
        })
    }
}

fn is_missing_table(err: &dyn DatabaseError) -> bool {
    err.message().contains("no such table")
}

#[async_trait]
impl Store for SqliteStore {
    fn backend_name(&self) -> &'static str {
        BACKEND
    }

    async fn ping(&mut self) -> Result<()> {
        sqlx::query(PROBE_SQL)
            .execute(&mut self.conn)
            .await
            .map_err(|e| query_error(e, PROBE_SQL, "Connection probe failed", is_missing_table))?;
        Ok(())
    }

    async fn reconnect(&mut self) -> Result<()> {
        replace_connection(&mut self.conn, &self.options, self.connect_timeout, BACKEND).await
    }

    async fn execute(&mut self, sql: &str, args: &[Arg]) -> Result<u64> {
        let result = bind::<Sqlite>(sql, args)
            .execute(&mut self.conn)
            .await
            .map_err(|e| query_error(e, sql, "Failed to execute statement", is_missing_table))?;
        Ok(result.rows_affected())
    }

    async fn fetch_messages(&mut self, sql: &str, args: &[Arg]) -> Result<Vec<MessageRow>> {
        let rows = bind::<Sqlite>(sql, args)
            .fetch_all(&mut self.conn)
            .await
            .map_err(|e| query_error(e, sql, "Failed to fetch messages", is_missing_table))?;
        message_rows(rows)
    }

    async fn fetch_optional_i64(&mut self, sql: &str, args: &[Arg]) -> Result<Option<i64>> {
        let row = bind::<Sqlite>(sql, args)
            .fetch_optional(&mut self.conn)
            .await
            .map_err(|e| query_error(e, sql, "Failed to fetch scalar", is_missing_table))?;
        first_i64(row)
    }
}

use crate::config::Config;
use crate::error::{Error, Result};
use crate::store::{
    bind, first_i64, message_rows, open, query_error, replace_connection, Arg, MessageRow, Store,
    PROBE_SQL,
};
use async_trait::async_trait;
use sqlx::error::DatabaseError;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::MySql;
use std::str::FromStr;
use std::time::Duration;

const BACKEND: &str = "mysql";

/// SQLSTATE for ER_NO_SUCH_TABLE (1146).
const NO_SUCH_TABLE: &str = "42S02";

/// A single MySQL / MariaDB connection.
///
/// New ids are read back with `LAST_INSERT_ID()`, which is scoped to the
/// connection, so a store must never be shared between queues.
#[derive(Debug)]
pub struct MySqlStore {
    conn: MySqlConnection,
    options: MySqlConnectOptions,
    connect_timeout: Duration,
}

impl MySqlStore {
    pub async fn new(dsn: &str, config: &Config) -> Result<Self> {
        let options = MySqlConnectOptions::from_str(dsn).map_err(|e| Error::InvalidConfig {
            field: "dsn".to_string(),
            message: format!("Invalid MySQL DSN: {}", e),
        })?;
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
    err.code().as_deref() == Some(NO_SUCH_TABLE)
}

#[async_trait]
impl Store for MySqlStore {
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
        let result = bind::<MySql>(sql, args)
            .execute(&mut self.conn)
            .await
            .map_err(|e| query_error(e, sql, "Failed to execute statement", is_missing_table))?;
        Ok(result.rows_affected())
    }

    async fn fetch_messages(&mut self, sql: &str, args: &[Arg]) -> Result<Vec<MessageRow>> {
        let rows = bind::<MySql>(sql, args)
            .fetch_all(&mut self.conn)
            .await
            .map_err(|e| query_error(e, sql, "Failed to fetch messages", is_missing_table))?;
        message_rows(rows)
    }

    async fn fetch_optional_i64(&mut self, sql: &str, args: &[Arg]) -> Result<Option<i64>> {
        let row = bind::<MySql>(sql, args)
            .fetch_optional(&mut self.conn)
            .await
            .map_err(|e| query_error(e, sql, "Failed to fetch scalar", is_missing_table))?;
        first_i64(row)
    }
}

use crate::config::Config;
use crate::error::{Error, Result};
use crate::store::{
    bind, first_i64, message_rows, open, query_error, replace_connection, Arg, MessageRow, Store,
    PROBE_SQL,
};
use async_trait::async_trait;
use sqlx::error::DatabaseError;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::Postgres;
use std::str::FromStr;
use std::time::Duration;

const BACKEND: &str = "postgres";

/// SQLSTATE `undefined_table`.
const UNDEFINED_TABLE: &str = "42P01";

/// A single PostgreSQL connection.
#[derive(Debug)]
pub struct PostgresStore {
    conn: PgConnection,
    options: PgConnectOptions,
    connect_timeout: Duration,
}

impl PostgresStore {
    pub async fn new(dsn: &str, config: &Config) -> Result<Self> {
        let options = PgConnectOptions::from_str(dsn).map_err(|e| Error::InvalidConfig {
            field: "dsn".to_string(),
            message: format!("Invalid Postgres DSN: {}", e),
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
    err.code().as_deref() == Some(UNDEFINED_TABLE)
}

#[async_trait]
impl Store for PostgresStore {
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
        let result = bind::<Postgres>(sql, args)
            .execute(&mut self.conn)
            .await
            .map_err(|e| query_error(e, sql, "Failed to execute statement", is_missing_table))?;
        Ok(result.rows_affected())
    }

    async fn fetch_messages(&mut self, sql: &str, args: &[Arg]) -> Result<Vec<MessageRow>> {
        let rows = bind::<Postgres>(sql, args)
            .fetch_all(&mut self.conn)
            .await
            .map_err(|e| query_error(e, sql, "Failed to fetch messages", is_missing_table))?;
        message_rows(rows)
    }

    async fn fetch_optional_i64(&mut self, sql: &str, args: &[Arg]) -> Result<Option<i64>> {
        let row = bind::<Postgres>(sql, args)
            .fetch_optional(&mut self.conn)
            .await
            .map_err(|e| query_error(e, sql, "Failed to fetch scalar", is_missing_table))?;
        first_i64(row)
    }
}

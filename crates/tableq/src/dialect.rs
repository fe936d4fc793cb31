//! SQL fragments that differ between the supported backends.
//!
//! The queue engine builds every statement from these fragments and never looks at
//! backend identity itself. Adding a backend means adding one variant and one match
//! arm per function below.
//!
//! Table names reaching this module have already been validated as plain identifiers
//! (see [`crate::config::Config::table_name_for`]), so they are interpolated unquoted.
use crate::error::{Error, Result};
use std::fmt;

/// SQL dialect of the connected backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// Row-id autoincrement backend; the id is read back with `last_insert_rowid()`.
    Sqlite,
    /// Sequence-backed ids returned by the insert itself (`RETURNING id`).
    Postgres,
    /// `AUTO_INCREMENT` ids read back with `LAST_INSERT_ID()`.
    MySql,
}

impl Dialect {
    /// Resolve the dialect from the platform name a store reports.
    pub fn from_backend_name(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Dialect::Sqlite),
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "mysql" | "mariadb" => Ok(Dialect::MySql),
            other => Err(Error::InvalidConfig {
                field: "backend".to_string(),
                message: format!("No SQL dialect for backend '{}'", other),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite",
            Dialect::Postgres => "postgres",
            Dialect::MySql => "mysql",
        }
    }

    /// `CREATE TABLE IF NOT EXISTS` for a queue table.
    pub fn create_table_sql(&self, table: &str) -> String {
        match self {
            Dialect::Sqlite => format!(
                r#"CREATE TABLE IF NOT EXISTS {table} (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    payload TEXT NOT NULL,
    state VARCHAR(16) NOT NULL DEFAULT 'ready',
    failures INTEGER NOT NULL DEFAULT 0,
    scheduled TEXT NULL DEFAULT NULL
)"#
            ),
            Dialect::Postgres => format!(
                r#"CREATE TABLE IF NOT EXISTS {table} (
    id BIGSERIAL PRIMARY KEY,
    payload TEXT NOT NULL,
    state VARCHAR(16) NOT NULL DEFAULT 'ready',
    failures BIGINT NOT NULL DEFAULT 0,
    scheduled TIMESTAMPTZ NULL DEFAULT NULL
)"#
            ),
            Dialect::MySql => format!(
                r#"CREATE TABLE IF NOT EXISTS {table} (
    id BIGINT NOT NULL AUTO_INCREMENT,
    payload LONGTEXT NOT NULL,
    state VARCHAR(16) NOT NULL DEFAULT 'ready',
    failures BIGINT NOT NULL DEFAULT 0,
    scheduled DATETIME NULL DEFAULT NULL,
    PRIMARY KEY (id)
)"#
            ),
        }
    }

    /// Secondary index on `(state, scheduled)`.
    ///
    /// MySQL has no `IF NOT EXISTS` for indexes; callers ignore failures of this statement.
    pub fn create_index_sql(&self, table: &str) -> String {
        let index = format!("{table}_state_scheduled_idx");
        match self {
            Dialect::Sqlite | Dialect::Postgres => {
                format!("CREATE INDEX IF NOT EXISTS {index} ON {table} (state, scheduled)")
            }
            Dialect::MySql => format!("CREATE INDEX {index} ON {table} (state, scheduled)"),
        }
    }

    pub fn drop_table_sql(&self, table: &str) -> String {
        format!("DROP TABLE IF EXISTS {table}")
    }

    /// Expression for "now plus `seconds`" on the database clock.
    pub fn now_plus_seconds(&self, seconds: u64) -> String {
        match self {
            Dialect::Sqlite => format!("datetime('now', '+{seconds} seconds')"),
            Dialect::Postgres => format!("NOW() + make_interval(secs => {seconds})"),
            Dialect::MySql => format!("NOW() + INTERVAL {seconds} SECOND"),
        }
    }

    /// Predicate that holds when a row's scheduled time is unset or has passed.
    pub fn visible_predicate(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "(scheduled IS NULL OR scheduled <= datetime('now'))",
            Dialect::Postgres | Dialect::MySql => "(scheduled IS NULL OR scheduled <= NOW())",
        }
    }

    /// Bind placeholder for the `n`-th (1-based) parameter of a statement.
    pub fn placeholder(&self, n: usize) -> String {
        match self {
            Dialect::Sqlite | Dialect::MySql => "?".to_string(),
            Dialect::Postgres => format!("${n}"),
        }
    }

    /// Clause appended to an insert so it yields the new id, if the backend supports it.
    pub fn returning_id_clause(&self) -> Option<&'static str> {
        match self {
            Dialect::Postgres => Some(" RETURNING id"),
            Dialect::Sqlite | Dialect::MySql => None,
        }
    }

    /// Query for the id generated by the last insert on the current connection.
    pub fn last_insert_id_sql(&self) -> Option<&'static str> {
        match self {
            Dialect::Sqlite => Some("SELECT last_insert_rowid()"),
            Dialect::MySql => Some("SELECT CAST(LAST_INSERT_ID() AS SIGNED)"),
            Dialect::Postgres => None,
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

//! AnyStore enum for runtime backend selection.
//!
//! `AnyStore` wraps the backend implementations and forwards the [`Store`] trait,
//! so a queue can be opened from a DSN without knowing the backend at compile time.

use super::*;
use crate::config::Config;
#[cfg(feature = "mysql")]
use crate::store::mysql::MySqlStore;
#[cfg(feature = "postgres")]
use crate::store::postgres::PostgresStore;
#[cfg(feature = "sqlite")]
use crate::store::sqlite::SqliteStore;

/// Runtime-selectable database backend.
#[derive(Debug)]
pub enum AnyStore {
    /// SQLite backend
    #[cfg(feature = "sqlite")]
    Sqlite(SqliteStore),
    /// PostgreSQL backend
    #[cfg(feature = "postgres")]
    Postgres(PostgresStore),
    /// MySQL / MariaDB backend
    #[cfg(feature = "mysql")]
    MySql(MySqlStore),
}

impl AnyStore {
    /// Open a connection using a configuration object.
    ///
    /// The DSN prefix selects the backend:
    /// - `sqlite:` / `sqlite://` → SQLite
    /// - `postgres://` / `postgresql://` → PostgreSQL
    /// - `mysql://` / `mariadb://` → MySQL
    pub async fn connect(config: &Config) -> crate::error::Result<Self> {
        let backend = BackendType::detect(&config.dsn)?;
        tracing::debug!("Connecting to {:?} backend", backend);

        match backend {
            #[cfg(feature = "sqlite")]
            BackendType::Sqlite => Ok(AnyStore::Sqlite(
                SqliteStore::new(&config.dsn, config).await?,
            )),
            #[cfg(feature = "postgres")]
            BackendType::Postgres => Ok(AnyStore::Postgres(
                PostgresStore::new(&config.dsn, config).await?,
            )),
            #[cfg(feature = "mysql")]
            BackendType::MySql => Ok(AnyStore::MySql(
                MySqlStore::new(&config.dsn, config).await?,
            )),
        }
    }

    /// Open a connection using just a DSN string and default settings.
    ///
    /// ```no_run
    /// # use tableq::store::AnyStore;
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let store = AnyStore::connect_with_dsn("sqlite://jobs.db?mode=rwc").await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn connect_with_dsn(dsn: &str) -> crate::error::Result<Self> {
        let config = Config::from_dsn(dsn);
        Self::connect(&config).await
    }
}

#[async_trait]
impl Store for AnyStore {
    fn backend_name(&self) -> &'static str {
        match self {
            #[cfg(feature = "sqlite")]
            AnyStore::Sqlite(s) => s.backend_name(),
            #[cfg(feature = "postgres")]
            AnyStore::Postgres(s) => s.backend_name(),
            #[cfg(feature = "mysql")]
            AnyStore::MySql(s) => s.backend_name(),
        }
    }

    async fn ping(&mut self) -> crate::error::Result<()> {
        match self {
            #[cfg(feature = "sqlite")]
            AnyStore::Sqlite(s) => s.ping().await,
            #[cfg(feature = "postgres")]
            AnyStore::Postgres(s) => s.ping().await,
            #[cfg(feature = "mysql")]
            AnyStore::MySql(s) => s.ping().await,
        }
    }

    async fn reconnect(&mut self) -> crate::error::Result<()> {
        match self {
            #[cfg(feature = "sqlite")]
            AnyStore::Sqlite(s) => s.reconnect().await,
            #[cfg(feature = "postgres")]
            AnyStore::Postgres(s) => s.reconnect().await,
            #[cfg(feature = "mysql")]
            AnyStore::MySql(s) => s.reconnect().await,
        }
    }

    async fn execute(&mut self, sql: &str, args: &[Arg]) -> crate::error::Result<u64> {
        match self {
            #[cfg(feature = "sqlite")]
            AnyStore::Sqlite(s) => s.execute(sql, args).await,
            #[cfg(feature = "postgres")]
            AnyStore::Postgres(s) => s.execute(sql, args).await,
            #[cfg(feature = "mysql")]
            AnyStore::MySql(s) => s.execute(sql, args).await,
        }
    }

    async fn fetch_messages(
        &mut self,
        sql: &str,
        args: &[Arg],
    ) -> crate::error::Result<Vec<MessageRow>> {
        match self {
            #[cfg(feature = "sqlite")]
            AnyStore::Sqlite(s) => s.fetch_messages(sql, args).await,
            #[cfg(feature = "postgres")]
            AnyStore::Postgres(s) => s.fetch_messages(sql, args).await,
            #[cfg(feature = "mysql")]
            AnyStore::MySql(s) => s.fetch_messages(sql, args).await,
        }
    }

    async fn fetch_optional_i64(
        &mut self,
        sql: &str,
        args: &[Arg],
    ) -> crate::error::Result<Option<i64>> {
        match self {
            #[cfg(feature = "sqlite")]
            AnyStore::Sqlite(s) => s.fetch_optional_i64(sql, args).await,
            #[cfg(feature = "postgres")]
            AnyStore::Postgres(s) => s.fetch_optional_i64(sql, args).await,
            #[cfg(feature = "mysql")]
            AnyStore::MySql(s) => s.fetch_optional_i64(sql, args).await,
        }
    }
}

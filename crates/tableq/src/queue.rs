//! The queue engine.
//!
//! A [`Queue`] owns one named queue, its backing table and one connection to the
//! database. Messages move through three states:
//!
//! ```text
//! submit ──> ready ──reserve/take──> reserved ──finish──> (row deleted)
//!              ^                        │
//!              └────────release─────────┘   abort: any state ──> failed
//! ```
//!
//! Reservation is optimistic: the oldest visible ready row is selected, then claimed
//! with an `UPDATE ... WHERE id = ? AND state = 'ready' AND <visible>` that re-checks
//! every precondition. Whoever updates the row owns it; a consumer that updates zero
//! rows lost the race and polls again. No application-level locks or multi-statement
//! transactions are involved, so any number of processes may share one table.
//!
//! Delivery is at-least-once. A reserved message whose consumer dies stays reserved
//! until it is released, aborted or finished by hand.
use crate::config::Config;
use crate::dialect::Dialect;
use crate::error::{Error, Result};
use crate::poll::{Clock, Deadline, TokioClock};
use crate::store::{AnyStore, Arg, MessageRow, Store};
use crate::types::{Message, MessageId, MessageOptions, MessageState, QueueStats};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// A durable queue stored in one table.
///
/// ```no_run
/// # use tableq::{Config, MessageOptions};
/// # use serde_json::json;
/// # use std::time::Duration;
/// # async fn example() -> tableq::Result<()> {
/// let config = Config::from_dsn("sqlite://jobs.db?mode=rwc");
/// let mut queue = tableq::queue("emails", &config).await?;
/// queue.setup().await?;
///
/// queue.submit(&json!({"to": "a@example.com"}), MessageOptions::immediate()).await?;
///
/// if let Some(message) = queue.reserve(Some(Duration::from_secs(5))).await? {
///     // ... process ...
///     queue.finish(message.id).await?;
/// }
/// # Ok(())
/// # }
/// ```
pub struct Queue<S: Store = AnyStore> {
    name: String,
    table: String,
    store: S,
    dialect: Dialect,
    default_timeout: Duration,
    poll_interval: Duration,
    clock: Arc<dyn Clock>,
}

impl<S: Store> Queue<S> {
    /// Create the engine for queue `name` on top of an open store.
    ///
    /// The SQL dialect is resolved once here, from the platform the store reports.
    /// The config's DSN is not used; the store is already connected.
    pub fn new(name: impl Into<String>, store: S, config: &Config) -> Result<Self> {
        config.validate_queue_options()?;
        let name = name.into();
        let table = config.table_name_for(&name)?;
        let dialect = store.dialect()?;

        tracing::debug!(
            "Queue '{}' bound to table '{}' ({} dialect)",
            name,
            table,
            dialect
        );

        Ok(Self {
            name,
            table,
            store,
            dialect,
            default_timeout: config.default_timeout(),
            poll_interval: config.poll_interval(),
            clock: Arc::new(TokioClock),
        })
    }

    /// Replace the time source used by the wait loop.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    // ===== Schema =====

    /// Create the backing table and its `(state, scheduled)` index if absent.
    ///
    /// Idempotent. A failure to create the index is logged and ignored.
    pub async fn setup(&mut self) -> Result<()> {
        let create_table = self.dialect.create_table_sql(&self.table);
        self.store
            .execute(&create_table, &[])
            .await
            .map_err(|e| Error::SchemaSetup {
                table: self.table.clone(),
                source: Box::new(e),
            })?;

        let create_index = self.dialect.create_index_sql(&self.table);
        if let Err(e) = self.store.execute(&create_index, &[]).await {
            tracing::debug!(
                "Index creation on '{}' skipped (probably exists): {}",
                self.table,
                e
            );
        }

        tracing::info!("Queue '{}' set up in table '{}'", self.name, self.table);
        Ok(())
    }

    /// Drop the backing table if it exists. Destroys every message.
    pub async fn teardown(&mut self) -> Result<()> {
        let drop_table = self.dialect.drop_table_sql(&self.table);
        self.store.execute(&drop_table, &[]).await?;
        tracing::info!("Queue '{}' torn down (table '{}')", self.name, self.table);
        Ok(())
    }

    /// Drop and recreate the backing table, destroying messages in every state.
    pub async fn flush(&mut self) -> Result<()> {
        self.teardown().await?;
        self.setup().await
    }

    // ===== Producing =====

    /// Enqueue a payload.
    ///
    /// Returns the new message id, or `None` when the insert affected no row, in
    /// which case nothing was enqueued. With a delay the message stays invisible to
    /// `reserve`, `take` and `peek` until the database clock passes it; delays above
    /// [`crate::types::MAX_DELAY`] are rejected with [`Error::InvalidConfig`].
    pub async fn submit<T: Serialize + ?Sized>(
        &mut self,
        payload: &T,
        options: MessageOptions,
    ) -> Result<Option<MessageId>> {
        let scheduled = self.scheduled_expr(options)?;
        let payload = serde_json::to_string(payload)?;
        let mut sql = format!(
            "INSERT INTO {} (payload, state, failures, scheduled) VALUES ({}, '{}', 0, {})",
            self.table,
            self.dialect.placeholder(1),
            MessageState::Ready,
            scheduled,
        );
        let args = [Arg::Text(payload)];

        if let Some(returning) = self.dialect.returning_id_clause() {
            sql.push_str(returning);
            let id = self
                .store
                .fetch_optional_i64(&sql, &args)
                .await
                .map_err(|e| self.table_error(e))?;
            return Ok(self.submitted(id));
        }

        let inserted = self
            .store
            .execute(&sql, &args)
            .await
            .map_err(|e| self.table_error(e))?;
        if inserted != 1 {
            return Ok(self.submitted(None));
        }

        let id = match self.dialect.last_insert_id_sql() {
            Some(last_id) => self.store.fetch_optional_i64(last_id, &[]).await?,
            None => None,
        };
        Ok(self.submitted(id))
    }

    fn submitted(&self, id: Option<i64>) -> Option<MessageId> {
        match id {
            Some(id) => {
                tracing::debug!("Submitted message {} to queue '{}'", id, self.name);
                Some(MessageId::new(id))
            }
            None => {
                tracing::warn!("Insert into '{}' affected no row", self.table);
                None
            }
        }
    }

    // ===== Consuming =====

    /// Wait up to `timeout` (default: the configured timeout) for a message and reserve it.
    ///
    /// Returns `None` when the timeout passes without a message. The caller must
    /// eventually `finish`, `release` or `abort` the returned message.
    pub async fn reserve(&mut self, timeout: Option<Duration>) -> Result<Option<Message>> {
        self.wait_for_message(timeout, false).await
    }

    /// Like [`Queue::reserve`], but deletes the row once it is reserved.
    ///
    /// If the delete does not remove exactly one row the call returns `None`; the
    /// row may then remain in the reserved state.
    pub async fn take(&mut self, timeout: Option<Duration>) -> Result<Option<Message>> {
        self.wait_for_message(timeout, true).await
    }

    async fn wait_for_message(
        &mut self,
        timeout: Option<Duration>,
        remove: bool,
    ) -> Result<Option<Message>> {
        let deadline = Deadline::new(self.clock.now(), timeout.unwrap_or(self.default_timeout));

        loop {
            self.ensure_connected().await?;

            if let Some(message) = self.try_reserve().await? {
                if !remove {
                    return Ok(Some(message));
                }
                return self.remove_taken(message).await;
            }

            if deadline.is_expired(self.clock.now()) {
                tracing::debug!("No message on queue '{}' before timeout", self.name);
                return Ok(None);
            }

            self.clock.sleep(self.poll_interval).await;
        }
    }

    /// Probe the connection and reopen it if the probe fails.
    async fn ensure_connected(&mut self) -> Result<()> {
        if let Err(e) = self.store.ping().await {
            tracing::warn!(
                "Connection for queue '{}' failed its probe ({}), reconnecting",
                self.name,
                e
            );
            self.store.reconnect().await?;
        }
        Ok(())
    }

    /// One reservation attempt: select the oldest visible ready row, then claim it.
    async fn try_reserve(&mut self) -> Result<Option<Message>> {
        let select = format!(
            "SELECT id, payload, failures FROM {} WHERE state = '{}' AND {} ORDER BY id ASC LIMIT 1",
            self.table,
            MessageState::Ready,
            self.dialect.visible_predicate(),
        );
        let candidate = self
            .store
            .fetch_messages(&select, &[])
            .await
            .map_err(|e| self.table_error(e))?
            .into_iter()
            .next();

        let Some(candidate) = candidate else {
            return Ok(None);
        };

        let claim = format!(
            "UPDATE {} SET state = '{}' WHERE id = {} AND state = '{}' AND {}",
            self.table,
            MessageState::Reserved,
            self.dialect.placeholder(1),
            MessageState::Ready,
            self.dialect.visible_predicate(),
        );
        let claimed = self
            .store
            .execute(&claim, &[Arg::Int(candidate.id)])
            .await
            .map_err(|e| self.table_error(e))?;

        if claimed != 1 {
            tracing::debug!(
                "Message {} on queue '{}' was reserved by another consumer",
                candidate.id,
                self.name
            );
            return Ok(None);
        }

        tracing::debug!("Reserved message {} on queue '{}'", candidate.id, self.name);
        let id = MessageId::new(candidate.id);
        match decode(candidate) {
            Ok(message) => Ok(Some(message)),
            Err(e) => {
                tracing::warn!(
                    "Message {} on queue '{}' has an undecodable payload, marking it failed: {}",
                    id,
                    self.name,
                    e
                );
                if let Err(abort_err) = self.abort(id).await {
                    tracing::warn!(
                        "Could not mark message {} as failed, it stays reserved: {}",
                        id,
                        abort_err
                    );
                }
                Err(e)
            }
        }
    }

    async fn remove_taken(&mut self, message: Message) -> Result<Option<Message>> {
        if self.delete(message.id).await? {
            return Ok(Some(message));
        }
        tracing::warn!(
            "Message {} on queue '{}' was reserved but could not be deleted; it stays reserved",
            message.id,
            self.name
        );
        Ok(None)
    }

    // ===== Acknowledging =====

    /// Return a message to `ready`, count one more failure and optionally delay it.
    ///
    /// Updating no row (unknown id) is not an error. A delay above
    /// [`crate::types::MAX_DELAY`] is rejected with [`Error::InvalidConfig`].
    pub async fn release(&mut self, id: MessageId, options: MessageOptions) -> Result<()> {
        let scheduled = self.scheduled_expr(options)?;
        let sql = format!(
            "UPDATE {} SET state = '{}', failures = failures + 1, scheduled = {} WHERE id = {}",
            self.table,
            MessageState::Ready,
            scheduled,
            self.dialect.placeholder(1),
        );
        let updated = self
            .store
            .execute(&sql, &[Arg::Int(id.as_i64())])
            .await
            .map_err(|e| self.table_error(e))?;
        tracing::debug!(
            "Released message {} on queue '{}' ({} row)",
            id,
            self.name,
            updated
        );
        Ok(())
    }

    /// Mark a message as failed, whatever its current state.
    pub async fn abort(&mut self, id: MessageId) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET state = '{}' WHERE id = {}",
            self.table,
            MessageState::Failed,
            self.dialect.placeholder(1),
        );
        let updated = self
            .store
            .execute(&sql, &[Arg::Int(id.as_i64())])
            .await
            .map_err(|e| self.table_error(e))?;
        tracing::debug!(
            "Aborted message {} on queue '{}' ({} row)",
            id,
            self.name,
            updated
        );
        Ok(())
    }

    /// Delete a message. Returns false if it no longer existed.
    pub async fn finish(&mut self, id: MessageId) -> Result<bool> {
        let deleted = self.delete(id).await?;
        if !deleted {
            tracing::debug!("Message {} on queue '{}' was already gone", id, self.name);
        }
        Ok(deleted)
    }

    async fn delete(&mut self, id: MessageId) -> Result<bool> {
        let sql = format!(
            "DELETE FROM {} WHERE id = {}",
            self.table,
            self.dialect.placeholder(1)
        );
        let deleted = self
            .store
            .execute(&sql, &[Arg::Int(id.as_i64())])
            .await
            .map_err(|e| self.table_error(e))?;
        Ok(deleted == 1)
    }

    // ===== Inspection =====

    /// Up to `limit` messages that `reserve` could hand out right now, oldest first.
    ///
    /// Read-only.
    pub async fn peek(&mut self, limit: usize) -> Result<Vec<Message>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        // LIMIT is a signed 64-bit value on every backend.
        let limit = limit.min(i64::MAX as usize);
        let sql = format!(
            "SELECT id, payload, failures FROM {} WHERE state = '{}' AND {} ORDER BY id ASC LIMIT {}",
            self.table,
            MessageState::Ready,
            self.dialect.visible_predicate(),
            limit,
        );
        let rows = self
            .store
            .fetch_messages(&sql, &[])
            .await
            .map_err(|e| self.table_error(e))?;
        rows.into_iter().map(decode).collect()
    }

    /// Ready messages, including those scheduled for later.
    pub async fn count_ready(&mut self) -> Result<i64> {
        self.count(MessageState::Ready).await
    }

    pub async fn count_reserved(&mut self) -> Result<i64> {
        self.count(MessageState::Reserved).await
    }

    pub async fn count_failed(&mut self) -> Result<i64> {
        self.count(MessageState::Failed).await
    }

    /// All three counts at once.
    pub async fn stats(&mut self) -> Result<QueueStats> {
        Ok(QueueStats {
            queue: self.name.clone(),
            ready: self.count_ready().await?,
            reserved: self.count_reserved().await?,
            failed: self.count_failed().await?,
        })
    }

    async fn count(&mut self, state: MessageState) -> Result<i64> {
        let sql = format!(
            "SELECT COUNT(*) FROM {} WHERE state = {}",
            self.table,
            self.dialect.placeholder(1)
        );
        let count = self
            .store
            .fetch_optional_i64(&sql, &[Arg::Text(state.as_str().to_string())])
            .await
            .map_err(|e| self.table_error(e))?;
        Ok(count.unwrap_or(0))
    }

    // ===== Helpers =====

    fn scheduled_expr(&self, options: MessageOptions) -> Result<String> {
        Ok(match options.delay_seconds()? {
            Some(seconds) => self.dialect.now_plus_seconds(seconds),
            None => "NULL".to_string(),
        })
    }

    fn table_error(&self, err: Error) -> Error {
        if err.is_missing_table() {
            Error::QueueNotSetUp {
                queue: self.name.clone(),
                table: self.table.clone(),
            }
        } else {
            err
        }
    }
}

fn decode(row: MessageRow) -> Result<Message> {
    Ok(Message {
        id: MessageId::new(row.id),
        payload: serde_json::from_str(&row.payload)?,
        failures: row.failures,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poll::ManualClock;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;

    /// Scripted reply to one store call.
    enum Reply {
        Rows(Vec<MessageRow>),
        Affected(u64),
        Scalar(Option<i64>),
        MissingTable,
        Fail,
    }

    /// Store that answers calls from a script and records the SQL it was given.
    ///
    /// Once the script runs out it answers "no rows", "0 affected" and "no value".
    struct ScriptedStore {
        backend: &'static str,
        replies: VecDeque<Reply>,
        statements: Vec<String>,
        failing_pings: usize,
        reconnect_fails: bool,
        pings: usize,
        reconnects: usize,
    }

    impl ScriptedStore {
        fn new(backend: &'static str, replies: Vec<Reply>) -> Self {
            Self {
                backend,
                replies: replies.into(),
                statements: Vec::new(),
                failing_pings: 0,
                reconnect_fails: false,
                pings: 0,
                reconnects: 0,
            }
        }

        fn next(&mut self, sql: &str) -> Option<Reply> {
            self.statements.push(sql.to_string());
            self.replies.pop_front()
        }

        fn count_matching(&self, needle: &str) -> usize {
            self.statements.iter().filter(|s| s.contains(needle)).count()
        }
    }

    fn failure(sql: &str) -> Error {
        Error::QueryFailed {
            source: "scripted failure".into(),
            query: sql.to_string(),
            context: "test".into(),
        }
    }

    fn missing(sql: &str) -> Error {
        Error::MissingTable {
            source: "no such table".into(),
            query: sql.to_string(),
        }
    }

    #[async_trait]
    impl Store for ScriptedStore {
        fn backend_name(&self) -> &'static str {
            self.backend
        }

        async fn ping(&mut self) -> Result<()> {
            self.pings += 1;
            if self.failing_pings > 0 {
                self.failing_pings -= 1;
                return Err(failure("SELECT 1"));
            }
            Ok(())
        }

        async fn reconnect(&mut self) -> Result<()> {
            self.reconnects += 1;
            if self.reconnect_fails {
                return Err(Error::ConnectionFailed {
                    source: "refused".into(),
                    context: "test".into(),
                });
            }
            Ok(())
        }

        async fn execute(&mut self, sql: &str, _args: &[Arg]) -> Result<u64> {
            match self.next(sql) {
                Some(Reply::Affected(n)) => Ok(n),
                Some(Reply::MissingTable) => Err(missing(sql)),
                Some(Reply::Fail) => Err(failure(sql)),
                None => Ok(0),
                Some(_) => panic!("unexpected execute: {}", sql),
            }
        }

        async fn fetch_messages(&mut self, sql: &str, _args: &[Arg]) -> Result<Vec<MessageRow>> {
            match self.next(sql) {
                Some(Reply::Rows(rows)) => Ok(rows),
                Some(Reply::MissingTable) => Err(missing(sql)),
                Some(Reply::Fail) => Err(failure(sql)),
                None => Ok(Vec::new()),
                Some(_) => panic!("unexpected fetch_messages: {}", sql),
            }
        }

        async fn fetch_optional_i64(&mut self, sql: &str, _args: &[Arg]) -> Result<Option<i64>> {
            match self.next(sql) {
                Some(Reply::Scalar(v)) => Ok(v),
                Some(Reply::MissingTable) => Err(missing(sql)),
                Some(Reply::Fail) => Err(failure(sql)),
                None => Ok(None),
                Some(_) => panic!("unexpected fetch_optional_i64: {}", sql),
            }
        }
    }

    fn row(id: i64, payload: &str) -> MessageRow {
        MessageRow {
            id,
            payload: payload.to_string(),
            failures: 0,
        }
    }

    fn queue_on(store: ScriptedStore) -> (Queue<ScriptedStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let config = Config::from_dsn("sqlite::memory:");
        let queue = Queue::new("jobs", store, &config)
            .unwrap()
            .with_clock(clock.clone());
        (queue, clock)
    }

    #[test]
    fn resolves_table_and_dialect() {
        let config = Config::from_dsn("postgres://localhost/db");
        let queue = Queue::new("Mail", ScriptedStore::new("postgres", vec![]), &config).unwrap();
        assert_eq!(queue.name(), "Mail");
        assert_eq!(queue.table_name(), "tableq_mail");
        assert_eq!(queue.dialect(), Dialect::Postgres);

        let unknown = Queue::new("jobs", ScriptedStore::new("db2", vec![]), &config);
        assert!(matches!(unknown, Err(Error::InvalidConfig { .. })));
    }

    #[tokio::test]
    async fn reserve_claims_the_oldest_candidate() {
        let store = ScriptedStore::new(
            "sqlite",
            vec![Reply::Rows(vec![row(1, r#"{"job":"x"}"#)]), Reply::Affected(1)],
        );
        let (mut queue, clock) = queue_on(store);

        let message = queue.reserve(None).await.unwrap().expect("message");
        assert_eq!(message.id, MessageId::new(1));
        assert_eq!(message.payload, json!({"job": "x"}));
        assert_eq!(clock.elapsed(), Duration::ZERO);

        let statements = &queue.store().statements;
        assert!(statements[0].contains("WHERE state = 'ready'"));
        assert!(statements[0].contains("ORDER BY id ASC LIMIT 1"));
        assert!(statements[1].starts_with("UPDATE tableq_jobs SET state = 'reserved'"));
        assert!(statements[1].contains("AND state = 'ready'"));
        assert!(statements[1].contains(Dialect::Sqlite.visible_predicate()));
    }

    #[tokio::test]
    async fn reserve_times_out_on_the_injected_clock() {
        let (mut queue, clock) = queue_on(ScriptedStore::new("sqlite", vec![]));

        let message = queue.reserve(Some(Duration::from_secs(3))).await.unwrap();
        assert!(message.is_none());
        // Attempts at t = 0, 1, 2 and 3 seconds; the last one sees the deadline.
        assert_eq!(clock.elapsed(), Duration::from_secs(3));
        assert_eq!(queue.store().count_matching("SELECT id"), 4);
        assert_eq!(queue.store().pings, 4);
    }

    #[tokio::test]
    async fn zero_timeout_polls_once() {
        let (mut queue, clock) = queue_on(ScriptedStore::new("sqlite", vec![]));

        assert!(queue.take(Some(Duration::ZERO)).await.unwrap().is_none());
        assert_eq!(clock.elapsed(), Duration::ZERO);
        assert_eq!(queue.store().count_matching("SELECT id"), 1);
    }

    #[tokio::test]
    async fn default_timeout_comes_from_config() {
        let clock = Arc::new(ManualClock::new());
        let config = Config::from_dsn("sqlite::memory:")
            .with_default_timeout(10)
            .with_poll_interval(5);
        let mut queue = Queue::new("jobs", ScriptedStore::new("sqlite", vec![]), &config)
            .unwrap()
            .with_clock(clock.clone());

        assert!(queue.reserve(None).await.unwrap().is_none());
        assert_eq!(clock.elapsed(), Duration::from_secs(10));
        assert_eq!(queue.store().count_matching("SELECT id"), 3);
    }

    #[tokio::test]
    async fn lost_race_discards_the_candidate_and_polls_again() {
        let store = ScriptedStore::new(
            "sqlite",
            vec![
                Reply::Rows(vec![row(1, "1")]),
                Reply::Affected(0),
                Reply::Rows(vec![row(2, "2")]),
                Reply::Affected(1),
            ],
        );
        let (mut queue, clock) = queue_on(store);

        let message = queue
            .reserve(Some(Duration::from_secs(5)))
            .await
            .unwrap()
            .expect("second candidate");
        assert_eq!(message.id, MessageId::new(2));
        assert_eq!(message.payload, json!(2));
        assert_eq!(clock.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn lost_race_with_no_time_left_returns_none() {
        let store = ScriptedStore::new(
            "sqlite",
            vec![Reply::Rows(vec![row(1, "1")]), Reply::Affected(0)],
        );
        let (mut queue, _clock) = queue_on(store);

        assert!(queue.reserve(Some(Duration::ZERO)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn take_deletes_after_reserving() {
        let store = ScriptedStore::new(
            "sqlite",
            vec![
                Reply::Rows(vec![row(7, r#""payload""#)]),
                Reply::Affected(1),
                Reply::Affected(1),
            ],
        );
        let (mut queue, _clock) = queue_on(store);

        let message = queue.take(None).await.unwrap().expect("message");
        assert_eq!(message.id, MessageId::new(7));

        let statements = &queue.store().statements;
        assert_eq!(statements.len(), 3);
        assert!(statements[1].starts_with("UPDATE"));
        assert_eq!(statements[2], "DELETE FROM tableq_jobs WHERE id = ?");
    }

    #[tokio::test]
    async fn take_reports_nothing_when_the_delete_misses() {
        let store = ScriptedStore::new(
            "sqlite",
            vec![
                Reply::Rows(vec![row(7, "null")]),
                Reply::Affected(1),
                Reply::Affected(0),
                Reply::Rows(vec![row(8, "null")]),
            ],
        );
        let (mut queue, clock) = queue_on(store);

        assert!(queue.take(Some(Duration::from_secs(30))).await.unwrap().is_none());
        // Gives up immediately instead of moving on to the next candidate.
        assert_eq!(clock.elapsed(), Duration::ZERO);
        assert_eq!(queue.store().statements.len(), 3);
    }

    #[tokio::test]
    async fn failed_probe_triggers_reconnect() {
        let mut store = ScriptedStore::new(
            "sqlite",
            vec![Reply::Rows(vec![row(1, "1")]), Reply::Affected(1)],
        );
        store.failing_pings = 1;
        let (mut queue, _clock) = queue_on(store);

        assert!(queue.reserve(None).await.unwrap().is_some());
        assert_eq!(queue.store().reconnects, 1);
    }

    #[tokio::test]
    async fn failed_reconnect_propagates() {
        let mut store = ScriptedStore::new("sqlite", vec![]);
        store.failing_pings = 1;
        store.reconnect_fails = true;
        let (mut queue, _clock) = queue_on(store);

        let err = queue.reserve(None).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionFailed { .. }));
        assert!(queue.store().statements.is_empty());
    }

    #[tokio::test]
    async fn missing_table_names_the_queue() {
        let (mut queue, _clock) = queue_on(ScriptedStore::new("sqlite", vec![Reply::MissingTable]));

        match queue.reserve(None).await {
            Err(Error::QueueNotSetUp { queue, table }) => {
                assert_eq!(queue, "jobs");
                assert_eq!(table, "tableq_jobs");
            }
            other => panic!("Expected QueueNotSetUp, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn other_store_errors_propagate_unchanged() {
        let (mut queue, _clock) = queue_on(ScriptedStore::new("sqlite", vec![Reply::Fail]));
        assert!(matches!(
            queue.reserve(None).await,
            Err(Error::QueryFailed { .. })
        ));
    }

    #[tokio::test]
    async fn submit_reads_last_insert_id_when_insert_returns_nothing() {
        let store = ScriptedStore::new("sqlite", vec![Reply::Affected(1), Reply::Scalar(Some(1))]);
        let (mut queue, _clock) = queue_on(store);

        let id = queue
            .submit(&json!({"job": "x"}), MessageOptions::immediate())
            .await
            .unwrap();
        assert_eq!(id, Some(MessageId::new(1)));

        let statements = &queue.store().statements;
        assert_eq!(
            statements[0],
            "INSERT INTO tableq_jobs (payload, state, failures, scheduled) VALUES (?, 'ready', 0, NULL)"
        );
        assert_eq!(statements[1], "SELECT last_insert_rowid()");
    }

    #[tokio::test]
    async fn submit_uses_returning_clause_when_available() {
        let store = ScriptedStore::new("postgres", vec![Reply::Scalar(Some(5))]);
        let (mut queue, _clock) = queue_on(store);

        let id = queue
            .submit(&"hello", MessageOptions::delayed(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(id, Some(MessageId::new(5)));

        let statements = &queue.store().statements;
        assert_eq!(statements.len(), 1);
        assert!(statements[0].contains("VALUES ($1, 'ready', 0, NOW() + make_interval(secs => 5))"));
        assert!(statements[0].ends_with(" RETURNING id"));
    }

    #[tokio::test]
    async fn submit_reports_empty_id_when_nothing_was_inserted() {
        let (mut queue, _clock) = queue_on(ScriptedStore::new("mysql", vec![Reply::Affected(0)]));

        let id = queue.submit(&1, MessageOptions::immediate()).await.unwrap();
        assert_eq!(id, None);
        // No last-insert-id lookup after a failed insert.
        assert_eq!(queue.store().statements.len(), 1);
    }

    #[tokio::test]
    async fn setup_ignores_index_failures() {
        let store = ScriptedStore::new("mysql", vec![Reply::Affected(0), Reply::Fail]);
        let (mut queue, _clock) = queue_on(store);

        queue.setup().await.expect("index failure must be swallowed");
        let statements = &queue.store().statements;
        assert!(statements[0].starts_with("CREATE TABLE IF NOT EXISTS tableq_jobs"));
        assert!(statements[1].starts_with("CREATE INDEX"));
    }

    #[tokio::test]
    async fn setup_propagates_table_failures() {
        let (mut queue, _clock) = queue_on(ScriptedStore::new("sqlite", vec![Reply::Fail]));

        match queue.setup().await {
            Err(Error::SchemaSetup { table, .. }) => assert_eq!(table, "tableq_jobs"),
            other => panic!("Expected SchemaSetup, got {:?}", other),
        }
        assert_eq!(queue.store().statements.len(), 1);
    }

    #[tokio::test]
    async fn flush_drops_then_recreates() {
        let (mut queue, _clock) = queue_on(ScriptedStore::new("sqlite", vec![]));

        queue.flush().await.unwrap();
        let statements = &queue.store().statements;
        assert_eq!(statements[0], "DROP TABLE IF EXISTS tableq_jobs");
        assert!(statements[1].starts_with("CREATE TABLE"));
        assert!(statements[2].starts_with("CREATE INDEX"));
    }

    #[tokio::test]
    async fn release_counts_a_failure_and_reschedules() {
        let (mut queue, _clock) = queue_on(ScriptedStore::new("sqlite", vec![]));

        queue
            .release(MessageId::new(3), MessageOptions::immediate())
            .await
            .unwrap();
        queue
            .release(
                MessageId::new(3),
                MessageOptions::delayed(Duration::from_secs(30)),
            )
            .await
            .unwrap();

        let statements = &queue.store().statements;
        assert_eq!(
            statements[0],
            "UPDATE tableq_jobs SET state = 'ready', failures = failures + 1, scheduled = NULL WHERE id = ?"
        );
        assert!(statements[1].contains("scheduled = datetime('now', '+30 seconds')"));
    }

    #[tokio::test]
    async fn abort_is_unconditional() {
        let (mut queue, _clock) = queue_on(ScriptedStore::new("postgres", vec![]));

        queue.abort(MessageId::new(9)).await.unwrap();
        assert_eq!(
            queue.store().statements[0],
            "UPDATE tableq_jobs SET state = 'failed' WHERE id = $1"
        );
    }

    #[tokio::test]
    async fn finish_reports_whether_a_row_was_deleted() {
        let store = ScriptedStore::new("sqlite", vec![Reply::Affected(1), Reply::Affected(0)]);
        let (mut queue, _clock) = queue_on(store);

        assert!(queue.finish(MessageId::new(1)).await.unwrap());
        assert!(!queue.finish(MessageId::new(1)).await.unwrap());
    }

    #[tokio::test]
    async fn peek_is_read_only() {
        let store = ScriptedStore::new(
            "sqlite",
            vec![Reply::Rows(vec![row(1, "\"a\""), row(2, "\"b\"")])],
        );
        let (mut queue, _clock) = queue_on(store);

        let messages = queue.peek(2).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].payload, json!("b"));
        assert!(queue.peek(0).await.unwrap().is_empty());

        let statements = &queue.store().statements;
        assert_eq!(statements.len(), 1);
        assert!(statements[0].starts_with("SELECT"));
        assert!(statements[0].ends_with("ORDER BY id ASC LIMIT 2"));
    }

    #[tokio::test]
    async fn delays_beyond_maximum_are_rejected_before_any_sql() {
        let (mut queue, _clock) = queue_on(ScriptedStore::new("sqlite", vec![]));
        let too_far = MessageOptions::delayed(Duration::from_secs(320_000_000_000));

        match queue.submit(&"far", too_far).await {
            Err(Error::InvalidConfig { field, .. }) => assert_eq!(field, "delay"),
            other => panic!("Expected InvalidConfig, got {:?}", other),
        }
        match queue.release(MessageId::new(1), too_far).await {
            Err(Error::InvalidConfig { field, .. }) => assert_eq!(field, "delay"),
            other => panic!("Expected InvalidConfig, got {:?}", other),
        }
        assert!(queue.store().statements.is_empty());

        queue
            .submit(&"edge", MessageOptions::delayed(crate::types::MAX_DELAY))
            .await
            .unwrap();
        assert!(queue.store().statements[0].contains("datetime('now', '+3153600000 seconds')"));
    }

    #[tokio::test]
    async fn peek_clamps_huge_limits() {
        let (mut queue, _clock) = queue_on(ScriptedStore::new("sqlite", vec![]));

        assert!(queue.peek(usize::MAX).await.unwrap().is_empty());
        assert!(queue.store().statements[0].ends_with("LIMIT 9223372036854775807"));
    }

    #[tokio::test]
    async fn undecodable_payload_is_marked_failed() {
        let store = ScriptedStore::new(
            "sqlite",
            vec![
                Reply::Rows(vec![row(4, "{not json")]),
                Reply::Affected(1),
                Reply::Affected(1),
            ],
        );
        let (mut queue, _clock) = queue_on(store);

        assert!(matches!(
            queue.reserve(None).await,
            Err(Error::Serialization(_))
        ));
        let statements = &queue.store().statements;
        assert_eq!(statements.len(), 3);
        assert_eq!(
            statements[2],
            "UPDATE tableq_jobs SET state = 'failed' WHERE id = ?"
        );
    }

    #[test]
    fn new_does_not_need_a_dsn() {
        let config = Config::from_dsn("");
        let queue = Queue::new("jobs", ScriptedStore::new("sqlite", vec![]), &config).unwrap();
        assert_eq!(queue.table_name(), "tableq_jobs");

        let config = config.with_poll_interval(0);
        assert!(Queue::new("jobs", ScriptedStore::new("sqlite", vec![]), &config).is_err());
    }

    #[tokio::test]
    async fn stats_counts_each_state() {
        let store = ScriptedStore::new(
            "sqlite",
            vec![
                Reply::Scalar(Some(4)),
                Reply::Scalar(Some(1)),
                Reply::Scalar(Some(2)),
            ],
        );
        let (mut queue, _clock) = queue_on(store);

        let stats = queue.stats().await.unwrap();
        assert_eq!(
            stats,
            QueueStats {
                queue: "jobs".into(),
                ready: 4,
                reserved: 1,
                failed: 2,
            }
        );
    }
}

//! # tableq
//!
//! **tableq** is a durable job queue stored in an ordinary relational table. It runs on
//! SQLite, PostgreSQL and MySQL/MariaDB, needs no broker and no locks beyond what the
//! database already provides.
//!
//! ## Features
//!
//! - **Library-only**: a queue is a table. Producers and consumers in any number of
//!   processes share it through the database.
//! - **Optimistic reservation**: consumers race with a guarded `UPDATE`; exactly one wins.
//! - **Delayed delivery**: messages can be scheduled for later, on submit or on release.
//! - **Failure tracking**: every release counts a failure, and aborted messages are kept
//!   aside in a `failed` state for inspection.
//! - **Self-healing connection**: the connection is probed before every poll attempt and
//!   reopened if the probe fails.
//!
//! Delivery is at-least-once. A consumer that crashes while holding a reservation leaves
//! the message reserved until someone releases, aborts or finishes it.
//!
//! ## Quick Start
//!
//! ```no_run
//! use serde_json::json;
//! use std::time::Duration;
//! use tableq::{Config, MessageOptions};
//!
//! # async fn example() -> tableq::Result<()> {
//! let config = Config::from_dsn("sqlite://jobs.db?mode=rwc");
//! let mut queue = tableq::queue("emails", &config).await?;
//!
//! // Setup (idempotent)
//! queue.setup().await?;
//!
//! // Producer
//! queue
//!     .submit(&json!({"to": "user@example.com"}), MessageOptions::immediate())
//!     .await?;
//!
//! // Consumer
//! while let Some(message) = queue.reserve(Some(Duration::from_secs(10))).await? {
//!     println!("Processing {}: {}", message.id, message.payload);
//!     queue.finish(message.id).await?;
//! }
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dialect;
pub mod error;
pub mod poll;
pub mod queue;
pub mod store;
pub mod types;

pub use crate::config::Config;
pub use crate::dialect::Dialect;
pub use crate::error::{Error, Result};
pub use crate::poll::{Clock, TokioClock};
pub use crate::queue::Queue;
pub use crate::store::{AnyStore, Store};
pub use crate::types::{Message, MessageId, MessageOptions, MessageState, QueueStats};

/// Connect to a database using a DSN string.
///
/// The backend is picked from the DSN scheme (`sqlite:`, `postgres://`, `mysql://`).
pub async fn connect(dsn: &str) -> Result<AnyStore> {
    AnyStore::connect_with_dsn(dsn).await
}

/// Connect to a database using a configuration object.
pub async fn connect_with_config(config: &Config) -> Result<AnyStore> {
    AnyStore::connect(config).await
}

/// Connect and open queue `name` in one step.
///
/// The queue's table is not created; call [`Queue::setup`] once before use.
pub async fn queue(name: &str, config: &Config) -> Result<Queue> {
    config.validate()?;
    let store = connect_with_config(config).await?;
    Queue::new(name, store, config)
}

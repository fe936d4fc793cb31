//! Data types exchanged between the queue engine and its callers.
//!
//! - [`Message`]: a reserved or peeked message (identifier, payload, failure count).
//! - [`MessageId`]: the store-assigned identifier; its string form is the decimal id.
//! - [`MessageState`]: the three states a row can be in.
//! - [`MessageOptions`]: per-call options of `submit` and `release`.
//! - [`QueueStats`]: counts by state.
use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tabled::Tabled;

/// Identifier of a message, assigned by the store on insert.
///
/// Identifiers increase monotonically within a queue table, which is what gives the
/// queue its FIFO order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(i64);

impl MessageId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn as_i64(self) -> i64 {
        self.0
    }
}

impl From<i64> for MessageId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.trim()
            .parse::<i64>()
            .map(Self)
            .map_err(|e| Error::InvalidConfig {
                field: "message_id".to_string(),
                message: format!("'{}' is not a message id: {}", s, e),
            })
    }
}

/// State of a message row.
///
/// There is no "done" state: finishing a message deletes its row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageState {
    /// Eligible for reservation once its scheduled time (if any) has passed
    Ready,
    /// Claimed by exactly one consumer, pending finish/release/abort
    Reserved,
    /// Terminal; never picked up again
    Failed,
}

impl MessageState {
    /// Value stored in the `state` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageState::Ready => "ready",
            MessageState::Reserved => "reserved",
            MessageState::Failed => "failed",
        }
    }
}

impl fmt::Display for MessageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ready" => Ok(MessageState::Ready),
            "reserved" => Ok(MessageState::Reserved),
            "failed" => Ok(MessageState::Failed),
            other => Err(Error::InvalidConfig {
                field: "state".to_string(),
                message: format!("Unknown message state '{}'", other),
            }),
        }
    }
}

/// A message handed out by `reserve`, `take` or `peek`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Tabled)]
pub struct Message {
    /// Store-assigned identifier
    pub id: MessageId,
    /// Decoded payload
    pub payload: Value,
    /// Number of times the message was released after a failed attempt
    pub failures: i64,
}

impl Message {
    /// Deserialize the payload into a concrete type.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// Longest delay `submit` and `release` accept (100 years).
///
/// Schedules must stay inside the timestamp range of every backend; SQLite's
/// `datetime()` yields NULL past year 9999, which would make the message visible.
pub const MAX_DELAY: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Options accepted by `submit` and `release`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageOptions {
    /// Keep the message invisible to reservation for this long.
    pub delay: Option<Duration>,
}

impl MessageOptions {
    /// Visible immediately.
    pub fn immediate() -> Self {
        Self::default()
    }

    /// Visible once `delay` has passed, measured on the database clock.
    pub fn delayed(delay: Duration) -> Self {
        Self { delay: Some(delay) }
    }

    /// Whole seconds of delay; sub-second delays round up to one second.
    ///
    /// Delays longer than [`MAX_DELAY`] are rejected.
    pub(crate) fn delay_seconds(&self) -> Result<Option<u64>> {
        let Some(delay) = self.delay.filter(|d| !d.is_zero()) else {
            return Ok(None);
        };
        if delay > MAX_DELAY {
            return Err(Error::InvalidConfig {
                field: "delay".to_string(),
                message: format!(
                    "Delay of {}s exceeds the maximum of {}s",
                    delay.as_secs(),
                    MAX_DELAY.as_secs()
                ),
            });
        }
        let secs = delay.as_secs();
        if delay.subsec_nanos() > 0 {
            Ok(Some(secs + 1))
        } else {
            Ok(Some(secs))
        }
    }
}

/// Number of messages per state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Tabled)]
pub struct QueueStats {
    /// Queue name
    pub queue: String,
    /// Ready messages, including those scheduled in the future
    pub ready: i64,
    /// Reserved messages
    pub reserved: i64,
    /// Failed messages
    pub failed: i64,
}

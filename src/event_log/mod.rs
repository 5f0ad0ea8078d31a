//! Append-only event streams.
//!
//! The bus does not depend on this module; it is the store a service writes a
//! fact to before announcing it on the bus.

mod in_memory;

pub use in_memory::InMemoryEventLog;

use thiserror::Error;
use uuid::Uuid;

/// One serialized event ready to be appended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventRecord {
    pub id: Uuid,
    pub event_type: String,
    pub data: Vec<u8>,
}

impl EventRecord {
    /// A record with a fresh random id.
    pub fn new(event_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            data,
        }
    }
}

/// What the caller believes about the stream before appending.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExpectedState {
    /// No check.
    Any,
    /// The stream must not exist yet.
    NoStream,
    /// The stream must already hold at least one event.
    StreamExists,
    /// The stream's last event must be at this zero-based revision.
    Revision(u64),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventLogError {
    #[error("wrong expected version for stream {stream}: expected {expected:?}, actual {actual:?}")]
    WrongExpectedVersion {
        stream: String,
        expected: ExpectedState,
        /// Current revision, `None` when the stream does not exist.
        actual: Option<u64>,
    },
    #[error("cannot append an empty batch to stream {0}")]
    EmptyAppend(String),
    #[error("event log lock poisoned during {0}")]
    LockPoisoned(&'static str),
}

pub trait EventLog: Send + Sync {
    /// Append `events` to `stream` if `expected` holds, returning the revision
    /// of the last appended event.
    fn append_to_stream(
        &self,
        stream: &str,
        expected: ExpectedState,
        events: Vec<EventRecord>,
    ) -> Result<u64, EventLogError>;

    /// All events of `stream` in append order; empty when it does not exist.
    fn read_stream(&self, stream: &str) -> Result<Vec<EventRecord>, EventLogError>;
}

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use super::{EventLog, EventLogError, EventRecord, ExpectedState};

/// Event log kept in process memory. Clones share the same streams.
#[derive(Clone, Default)]
pub struct InMemoryEventLog {
    streams: Arc<RwLock<HashMap<String, Vec<EventRecord>>>>,
}

impl InMemoryEventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Revision of the last event in `stream`, if any.
    pub fn revision(&self, stream: &str) -> Result<Option<u64>, EventLogError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| EventLogError::LockPoisoned("read"))?;
        Ok(streams.get(stream).and_then(|events| last_revision(events)))
    }
}

fn last_revision(events: &[EventRecord]) -> Option<u64> {
    (events.len() as u64).checked_sub(1)
}

fn satisfies(expected: ExpectedState, actual: Option<u64>) -> bool {
    match expected {
        ExpectedState::Any => true,
        ExpectedState::NoStream => actual.is_none(),
        ExpectedState::StreamExists => actual.is_some(),
        ExpectedState::Revision(revision) => actual == Some(revision),
    }
}

impl EventLog for InMemoryEventLog {
    fn append_to_stream(
        &self,
        stream: &str,
        expected: ExpectedState,
        events: Vec<EventRecord>,
    ) -> Result<u64, EventLogError> {
        if events.is_empty() {
            return Err(EventLogError::EmptyAppend(stream.to_string()));
        }

        let mut streams = self
            .streams
            .write()
            .map_err(|_| EventLogError::LockPoisoned("append"))?;

        let actual = streams.get(stream).and_then(|events| last_revision(events));
        if !satisfies(expected, actual) {
            return Err(EventLogError::WrongExpectedVersion {
                stream: stream.to_string(),
                expected,
                actual,
            });
        }

        let count = events.len();
        let entries = streams.entry(stream.to_string()).or_default();
        entries.extend(events);
        let revision = entries.len() as u64 - 1;

        debug!(stream, count, revision, "appended events");
        Ok(revision)
    }

    fn read_stream(&self, stream: &str) -> Result<Vec<EventRecord>, EventLogError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| EventLogError::LockPoisoned("read"))?;
        Ok(streams.get(stream).cloned().unwrap_or_default())
    }
}

//! Bus integration tests against the in-memory broker.

mod support;

mod concurrency;
mod consume;
#[cfg(feature = "derive")]
mod derive;
mod publish;
mod quarantine;

//! Error quarantine: failed deliveries are parked in `{queue}.error`.

use std::any::Any;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::bus::Core;
use super::channel::{BrokerChannel, DEFAULT_EXCHANGE};
use crate::codec;
use crate::error::BusError;
use crate::naming::error_queue_name;

/// Why a handler did not accept a delivery.
#[derive(Debug, Error)]
pub enum HandlerFailure {
    #[error("{0}")]
    Returned(anyhow::Error),
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HandlerFailure {
    /// Build a failure from the payload of a caught panic.
    pub fn from_panic(panic: Box<dyn Any + Send>) -> Self {
        let message = if let Some(message) = panic.downcast_ref::<&'static str>() {
            (*message).to_string()
        } else if let Some(message) = panic.downcast_ref::<String>() {
            message.clone()
        } else {
            "non-string panic payload".to_string()
        };
        HandlerFailure::Panicked(message)
    }

    /// Human-readable summary of the failure.
    pub fn description(&self) -> String {
        match self {
            HandlerFailure::Returned(err) => err.to_string(),
            HandlerFailure::Panicked(message) => message.clone(),
        }
    }

    /// Diagnostic trace: the full error report including its cause chain (and
    /// backtrace when `RUST_BACKTRACE` enables one). Panics carry none.
    pub fn trace(&self) -> Option<String> {
        match self {
            HandlerFailure::Returned(err) => Some(format!("{:?}", err)),
            HandlerFailure::Panicked(_) => None,
        }
    }
}

/// What lands in an error queue for every failed delivery.
///
/// Serialized with PascalCase field names:
/// `{"Description": "...", "StackTrace": "..." | null, "Message": "..."}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct QuarantineRecord {
    pub description: String,
    pub stack_trace: Option<String>,
    /// The delivered payload as text, whether or not it decoded.
    pub message: String,
}

impl QuarantineRecord {
    pub fn new(failure: &HandlerFailure, payload: &[u8]) -> Self {
        Self {
            description: failure.description(),
            stack_trace: failure.trace(),
            message: codec::payload_text(payload),
        }
    }
}

/// Deposit a failed delivery of `consumer_queue` into its error queue.
///
/// The error queue is declared on first use and never bound to an exchange;
/// the record is sent to it by name through the default exchange. Failures to
/// do so are returned to the delivery loop rather than handled here.
pub(crate) fn quarantine<C: BrokerChannel>(
    core: &mut Core<C>,
    consumer_queue: &str,
    payload: &[u8],
    failure: &HandlerFailure,
) -> Result<(), BusError> {
    let error_queue = error_queue_name(consumer_queue);
    let Core { channel, topology } = core;
    topology.ensure_queue(channel, &error_queue, None)?;

    let record = QuarantineRecord::new(failure, payload);
    let body = codec::encode(&record)?;
    channel.basic_publish(DEFAULT_EXCHANGE, &error_queue, &body)?;

    debug!(queue = consumer_queue, error_queue = %error_queue, "quarantined delivery");
    Ok(())
}

use thiserror::Error;

use crate::bus::BrokerError;
use crate::codec::CodecError;

/// Errors surfaced by the bus to publishers and consumer registrations.
#[derive(Debug, Error)]
pub enum BusError {
    /// The broker could not be reached or refused the operation.
    #[error(transparent)]
    Broker(#[from] BrokerError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("bus lock poisoned during {0}")]
    LockPoisoned(&'static str),
}

//! The broker channel seam.
//!
//! Every declare, bind, publish and consume call the bus makes goes through a
//! single `BrokerChannel`. Methods take `&mut self`: a channel is not safe for
//! unsynchronized concurrent use, and the bus serializes access to it together
//! with its topology cache.

use thiserror::Error;

/// Name of the broker's default (nameless) exchange, which routes a message
/// straight to the queue named by its routing key.
pub const DEFAULT_EXCHANGE: &str = "";

/// Routing key used for every fanout publish and binding.
pub const NO_ROUTING_KEY: &str = "";

/// Distribution mode of an exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ExchangeKind {
    /// Every bound queue receives every message; routing keys are ignored.
    Fanout,
    /// Queues receive messages whose routing key equals their binding key.
    Direct,
}

impl ExchangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeKind::Fanout => "fanout",
            ExchangeKind::Direct => "direct",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExchangeOptions {
    pub durable: bool,
    pub auto_delete: bool,
}

impl Default for ExchangeOptions {
    fn default() -> Self {
        Self {
            durable: true,
            auto_delete: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueOptions {
    pub durable: bool,
    pub exclusive: bool,
    pub auto_delete: bool,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            durable: true,
            exclusive: false,
            auto_delete: false,
        }
    }
}

/// A message handed to a consumer by the broker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delivery {
    pub delivery_tag: u64,
    /// Exchange the message was published to (empty for the default exchange).
    pub exchange: String,
    pub routing_key: String,
    /// Raw wire bytes, exactly as published.
    pub payload: Vec<u8>,
}

impl Delivery {
    pub fn payload_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

/// Callback invoked by the broker's dispatch for each delivery, one at a time.
pub type DeliveryCallback = Box<dyn FnMut(Delivery) + Send + 'static>;

/// Transport-level failures. These are never retried by the bus.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("channel closed")]
    ChannelClosed,
    #[error("{resource} '{name}' not found")]
    NotFound { resource: &'static str, name: String },
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("publish to '{0}' rejected")]
    Rejected(String),
    #[error("failed to start consumer: {0}")]
    ConsumerFailed(String),
    #[error("blocking broker call failed to run: {0}")]
    Blocking(String),
    #[cfg(feature = "amqp")]
    #[error("amqp error: {0}")]
    Amqp(#[from] lapin::Error),
}

/// A single connection/channel to an AMQP-style broker.
///
/// Implementations:
/// - `InMemoryBroker` - for tests and single-process use
/// - `AmqpChannel` - RabbitMQ via lapin (requires the `amqp` feature)
pub trait BrokerChannel: Send + 'static {
    /// Declare an exchange. Re-declaring an existing exchange with the same
    /// kind is a no-op on the broker.
    fn exchange_declare(
        &mut self,
        exchange: &str,
        kind: ExchangeKind,
        options: ExchangeOptions,
    ) -> Result<(), BrokerError>;

    /// Declare a queue. Re-declaring an existing queue is a no-op on the broker.
    fn queue_declare(&mut self, queue: &str, options: QueueOptions) -> Result<(), BrokerError>;

    fn queue_bind(&mut self, queue: &str, exchange: &str, routing_key: &str)
        -> Result<(), BrokerError>;

    fn queue_unbind(
        &mut self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError>;

    /// Publish a payload and wait for the broker to accept it.
    fn basic_publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), BrokerError>;

    /// Start consuming `queue` with automatic acknowledgement.
    ///
    /// Messages are removed from the queue as soon as they are handed to the
    /// process, whatever the callback does with them. The callback runs on the
    /// broker client's own dispatch thread, serially per consumer. Returns the
    /// consumer tag.
    fn basic_consume(&mut self, queue: &str, callback: DeliveryCallback)
        -> Result<String, BrokerError>;
}

impl<C: BrokerChannel + ?Sized> BrokerChannel for Box<C> {
    fn exchange_declare(
        &mut self,
        exchange: &str,
        kind: ExchangeKind,
        options: ExchangeOptions,
    ) -> Result<(), BrokerError> {
        (**self).exchange_declare(exchange, kind, options)
    }

    fn queue_declare(&mut self, queue: &str, options: QueueOptions) -> Result<(), BrokerError> {
        (**self).queue_declare(queue, options)
    }

    fn queue_bind(
        &mut self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        (**self).queue_bind(queue, exchange, routing_key)
    }

    fn queue_unbind(
        &mut self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        (**self).queue_unbind(queue, exchange, routing_key)
    }

    fn basic_publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), BrokerError> {
        (**self).basic_publish(exchange, routing_key, payload)
    }

    fn basic_consume(
        &mut self,
        queue: &str,
        callback: DeliveryCallback,
    ) -> Result<String, BrokerError> {
        (**self).basic_consume(queue, callback)
    }
}

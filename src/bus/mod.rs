//! Service Bus - typed publish/subscribe over an AMQP-style broker
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Bus (per service)                         │
//! │  publish(event)            consume(queue, handler)          │
//! └─────────────────────────────────────────────────────────────┘
//!               │                          │
//!               ▼                          ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │   TopologyCache + BrokerChannel  (one lock, serialized)      │
//! │   declare-if-absent · bind · release dead letter · publish   │
//! └─────────────────────────────────────────────────────────────┘
//!          │                                       │
//!          ▼                                       ▼
//! ┌──────────────────┐                  ┌─────────────────────┐
//! │  InMemoryBroker  │                  │ AmqpChannel (lapin) │
//! │   (included)     │                  │  feature = "amqp"   │
//! └──────────────────┘                  └─────────────────────┘
//! ```
//!
//! ## Topology
//!
//! Each event type gets a durable fanout exchange named after it
//! (`UserRegisteredEvent` → `user-registered-event`). The first time the
//! exchange is declared, `{event-type}.dead-letter` is bound to it so events
//! published before any consumer exists are kept. The first `consume` for the
//! event type unbinds that buffer.
//!
//! Consumers are auto-acknowledged (at-most-once). A delivery whose handler
//! fails is written, together with the error, to `{queue}.error`.

mod bus;
mod channel;
mod consumer;
mod in_memory_broker;
mod publisher;
mod quarantine;
mod topology;

#[cfg(feature = "amqp")]
mod amqp;

pub use bus::{Bus, MessageBus};
pub use channel::{
    BrokerChannel, BrokerError, Delivery, DeliveryCallback, ExchangeKind, ExchangeOptions,
    QueueOptions, DEFAULT_EXCHANGE, NO_ROUTING_KEY,
};
pub use consumer::{Consumer, ConsumerStats};
pub use in_memory_broker::{BrokerCall, InMemoryBroker};
pub use quarantine::{HandlerFailure, QuarantineRecord};
pub use topology::{ExchangeState, TopologyCache};

#[cfg(feature = "amqp")]
pub use amqp::AmqpChannel;

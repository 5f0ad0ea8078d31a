extern crate self as sourced_bus;

pub mod bus;
pub mod codec;
pub mod config;
mod error;
mod event;
pub mod event_log;
pub mod events;
pub mod naming;

pub use bus::{Bus, Consumer, ConsumerStats, InMemoryBroker, MessageBus};
pub use config::{BrokerConfig, ConfigError};
pub use error::BusError;
pub use event::DomainEvent;
pub use naming::{EventRoutes, EventType};

#[cfg(feature = "amqp")]
pub use bus::AmqpChannel;

// Derive macro shares the trait's name, the same way serde does it.
#[cfg(feature = "derive")]
pub use sourced_bus_macros::DomainEvent;

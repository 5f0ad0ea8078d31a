//! Bus - the publish/consume entry point owned by a service.

use std::sync::{Arc, Mutex, MutexGuard};

use super::channel::BrokerChannel;
use super::consumer::Consumer;
use super::topology::{ExchangeState, TopologyCache};
use crate::error::BusError;
use crate::naming::EventType;
use crate::DomainEvent;

/// Channel and topology cache, guarded by one lock so that every
/// check-then-declare, bind, unbind and publish is serialized.
pub(crate) struct Core<C> {
    pub(crate) channel: C,
    pub(crate) topology: TopologyCache,
}

/// Event bus over a single broker channel.
///
/// Cloning is cheap; clones share the channel and the topology cache.
///
/// ## Example
///
/// ```
/// use serde::{Deserialize, Serialize};
/// use sourced_bus::bus::{Bus, InMemoryBroker};
/// use sourced_bus::DomainEvent;
///
/// #[derive(Serialize, Deserialize, DomainEvent)]
/// struct OrderPlaced {
///     id: String,
/// }
///
/// let broker = InMemoryBroker::new();
/// let bus = Bus::new(broker.clone());
///
/// // No consumer yet: the event is parked in the dead-letter buffer.
/// bus.publish(&OrderPlaced { id: "o1".into() }).unwrap();
/// assert_eq!(broker.queue_len("order-placed.dead-letter"), 1);
///
/// let consumer = bus
///     .consume("Billing", |order: Option<OrderPlaced>| {
///         if let Some(order) = order {
///             println!("billing {}", order.id);
///         }
///         Ok(())
///     })
///     .unwrap();
/// assert_eq!(consumer.queue(), "billing");
/// ```
pub struct Bus<C> {
    core: Arc<Mutex<Core<C>>>,
}

impl<C> Clone for Bus<C> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<C: BrokerChannel> Bus<C> {
    /// Create a bus over an already connected channel.
    pub fn new(channel: C) -> Self {
        Self {
            core: Arc::new(Mutex::new(Core {
                channel,
                topology: TopologyCache::new(),
            })),
        }
    }

    pub(crate) fn lock(&self, operation: &'static str) -> Result<MutexGuard<'_, Core<C>>, BusError> {
        self.core
            .lock()
            .map_err(|_| BusError::LockPoisoned(operation))
    }

    pub(crate) fn core(&self) -> &Arc<Mutex<Core<C>>> {
        &self.core
    }

    /// Where an event type's exchange is in its dead-letter lifecycle, or
    /// `None` if this bus has not touched it yet.
    pub fn exchange_state(&self, event_type: &EventType) -> Result<Option<ExchangeState>, BusError> {
        Ok(self
            .lock("exchange_state")?
            .topology
            .exchange_state(event_type.exchange()))
    }

    /// Drop every cached declaration so the next publish or consume declares
    /// its topology on the broker again, e.g. after the broker lost
    /// non-durable state. Released dead-letter buffers stay released.
    pub fn forget_topology(&self) -> Result<(), BusError> {
        self.lock("forget_topology")?.topology.forget();
        Ok(())
    }
}

/// Publish/consume seam for code that should not care which broker backs
/// the bus.
pub trait MessageBus: Send + Sync {
    fn publish<E: DomainEvent>(&self, event: &E) -> Result<(), BusError>;

    fn consume<E, F>(&self, queue_name: &str, handler: F) -> Result<Consumer, BusError>
    where
        E: DomainEvent,
        F: FnMut(Option<E>) -> anyhow::Result<()> + Send + 'static;
}

impl<C: BrokerChannel> MessageBus for Bus<C> {
    fn publish<E: DomainEvent>(&self, event: &E) -> Result<(), BusError> {
        Bus::publish(self, event)
    }

    fn consume<E, F>(&self, queue_name: &str, handler: F) -> Result<Consumer, BusError>
    where
        E: DomainEvent,
        F: FnMut(Option<E>) -> anyhow::Result<()> + Send + 'static,
    {
        Bus::consume(self, queue_name, handler)
    }
}

//! Publishing typed events onto their fanout exchange.

use tracing::debug;

use super::bus::{Bus, Core};
use super::channel::{BrokerChannel, NO_ROUTING_KEY};
use crate::codec;
use crate::error::BusError;
use crate::DomainEvent;

impl<C: BrokerChannel> Bus<C> {
    /// Publish an event to every queue currently bound to its exchange.
    ///
    /// The exchange (and, on first declaration, its dead-letter queue) is
    /// declared if this bus has not seen it yet. Until a consumer registers for
    /// the event type, published events accumulate in
    /// `{event-type}.dead-letter`.
    ///
    /// Blocks until the broker has accepted the message. Transport failures
    /// are returned as-is: nothing is buffered locally and nothing is retried.
    pub fn publish<E: DomainEvent>(&self, event: &E) -> Result<(), BusError> {
        let event_type = E::event_type();
        let payload = codec::encode(event)?;

        let mut core = self.lock("publish")?;
        let Core { channel, topology } = &mut *core;
        topology.ensure_event_exchange(channel, &event_type)?;
        channel.basic_publish(event_type.exchange(), NO_ROUTING_KEY, &payload)?;

        debug!(
            event_type = %event_type,
            bytes = payload.len(),
            "published event"
        );
        Ok(())
    }

    /// Publish several events in order, stopping at the first failure.
    pub fn publish_batch<E: DomainEvent>(&self, events: &[E]) -> Result<(), BusError> {
        for event in events {
            self.publish(event)?;
        }
        Ok(())
    }
}

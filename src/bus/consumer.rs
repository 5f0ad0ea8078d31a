//! Consumer registration and the per-message delivery loop.

use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, error, info, warn};

use super::bus::{Bus, Core};
use super::channel::{BrokerChannel, Delivery};
use super::quarantine::{self, HandlerFailure};
use crate::codec;
use crate::error::BusError;
use crate::naming::{EventRoutes, EventType};
use crate::DomainEvent;

/// Counters for one consumer, updated by its delivery loop.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerStats {
    /// Messages handed over by the broker (already acknowledged).
    pub delivered: usize,
    /// Messages the handler accepted.
    pub handled: usize,
    /// Messages whose payload did not decode; the handler saw `None`.
    pub decode_failures: usize,
    /// Messages written to the error queue.
    pub quarantined: usize,
    /// Failed messages that could not be written to the error queue either.
    pub quarantine_failures: usize,
}

#[derive(Debug, Default)]
struct StatsCounters {
    delivered: AtomicUsize,
    handled: AtomicUsize,
    decode_failures: AtomicUsize,
    quarantined: AtomicUsize,
    quarantine_failures: AtomicUsize,
}

impl StatsCounters {
    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> ConsumerStats {
        ConsumerStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            handled: self.handled.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            quarantined: self.quarantined.load(Ordering::Relaxed),
            quarantine_failures: self.quarantine_failures.load(Ordering::Relaxed),
        }
    }
}

/// Handle to a registered consumer.
///
/// Dropping the handle, or every `Bus` handle, does not stop delivery: the
/// delivery loop keeps the channel alive and runs until the broker closes it.
#[derive(Debug, Clone)]
pub struct Consumer {
    routes: EventRoutes,
    consumer_tag: String,
    stats: Arc<StatsCounters>,
}

impl Consumer {
    /// The queue actually consumed, after kebab-case normalization.
    pub fn queue(&self) -> &str {
        &self.routes.queue
    }

    /// Where failed deliveries of this queue are quarantined.
    pub fn error_queue(&self) -> &str {
        &self.routes.error_queue
    }

    pub fn event_type(&self) -> &EventType {
        &self.routes.event_type
    }

    pub fn routes(&self) -> &EventRoutes {
        &self.routes
    }

    pub fn consumer_tag(&self) -> &str {
        &self.consumer_tag
    }

    pub fn stats(&self) -> ConsumerStats {
        self.stats.snapshot()
    }
}

impl<C: BrokerChannel> Bus<C> {
    /// Register `handler` for every `E` delivered to `queue_name`.
    ///
    /// The queue name is kebab-cased before use (`ConfirmEmail` becomes
    /// `confirm-email`). Registration declares the event's exchange and the
    /// queue, binds them, and releases the event type's dead-letter buffer:
    /// from then on the exchange stops copying events into
    /// `{event-type}.dead-letter`, for this consumer and every later one.
    /// Events already parked there are not moved.
    ///
    /// Deliveries are auto-acknowledged, so each message is delivered at most
    /// once. The handler receives `None` when a payload cannot be decoded. If
    /// the handler returns an error or panics, the raw payload is written to
    /// `{queue}.error` and the loop moves on to the next message.
    ///
    /// The whole registration runs under the bus lock, so a concurrent
    /// `publish` of the same event type lands either entirely before it (in the
    /// dead-letter buffer) or entirely after it (in the queue).
    pub fn consume<E, F>(&self, queue_name: &str, handler: F) -> Result<Consumer, BusError>
    where
        E: DomainEvent,
        F: FnMut(Option<E>) -> anyhow::Result<()> + Send + 'static,
    {
        let routes = EventRoutes::for_consumer::<E>(queue_name);
        let stats = Arc::new(StatsCounters::default());

        let mut delivery_loop = DeliveryLoop {
            queue: routes.queue.clone(),
            handler,
            core: Arc::clone(self.core()),
            stats: Arc::clone(&stats),
            _event: PhantomData::<fn() -> E>,
        };

        let mut core = self.lock("consume")?;
        let Core { channel, topology } = &mut *core;
        let exchange = routes.event_type.exchange();

        topology.ensure_event_exchange(channel, &routes.event_type)?;
        topology.ensure_queue(channel, &routes.queue, Some(exchange))?;
        topology.release_dead_letter(channel, &routes.event_type)?;

        let consumer_tag = channel.basic_consume(
            &routes.queue,
            Box::new(move |delivery| delivery_loop.on_delivery(delivery)),
        )?;

        info!(
            queue = %routes.queue,
            event_type = %routes.event_type,
            consumer_tag = %consumer_tag,
            "registered consumer"
        );

        Ok(Consumer {
            routes,
            consumer_tag,
            stats,
        })
    }
}

struct DeliveryLoop<E, F, C> {
    queue: String,
    handler: F,
    core: Arc<Mutex<Core<C>>>,
    stats: Arc<StatsCounters>,
    _event: PhantomData<fn() -> E>,
}

impl<E, F, C> DeliveryLoop<E, F, C>
where
    E: DomainEvent,
    F: FnMut(Option<E>) -> anyhow::Result<()>,
    C: BrokerChannel,
{
    fn on_delivery(&mut self, delivery: Delivery) {
        StatsCounters::bump(&self.stats.delivered);

        let message = match codec::decode::<E>(&delivery.payload) {
            Ok(event) => Some(event),
            Err(err) => {
                StatsCounters::bump(&self.stats.decode_failures);
                warn!(
                    queue = %self.queue,
                    delivery_tag = delivery.delivery_tag,
                    error = %err,
                    "could not decode delivery; handing an empty message to the handler"
                );
                None
            }
        };

        let handler = &mut self.handler;
        let failure = match panic::catch_unwind(AssertUnwindSafe(|| handler(message))) {
            Ok(Ok(())) => {
                StatsCounters::bump(&self.stats.handled);
                debug!(queue = %self.queue, delivery_tag = delivery.delivery_tag, "handled delivery");
                return;
            }
            Ok(Err(err)) => HandlerFailure::Returned(err),
            Err(panic) => HandlerFailure::from_panic(panic),
        };

        warn!(
            queue = %self.queue,
            delivery_tag = delivery.delivery_tag,
            error = %failure,
            "handler failed; quarantining delivery"
        );

        match self.quarantine(&delivery.payload, &failure) {
            Ok(()) => StatsCounters::bump(&self.stats.quarantined),
            Err(err) => {
                StatsCounters::bump(&self.stats.quarantine_failures);
                error!(
                    queue = %self.queue,
                    delivery_tag = delivery.delivery_tag,
                    error = %err,
                    payload = %codec::payload_text(&delivery.payload),
                    "failed to quarantine delivery; message is lost"
                );
            }
        }
    }

    fn quarantine(&self, payload: &[u8], failure: &HandlerFailure) -> Result<(), BusError> {
        let mut core = self
            .core
            .lock()
            .map_err(|_| BusError::LockPoisoned("quarantine"))?;
        quarantine::quarantine(&mut core, &self.queue, payload, failure)
    }
}

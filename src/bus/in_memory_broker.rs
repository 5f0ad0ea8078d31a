//! In-memory broker for testing and single-process scenarios.
//!
//! `InMemoryBroker` implements `BrokerChannel` with the AMQP semantics the bus
//! relies on, without any external dependencies:
//! - fanout and direct exchanges, plus the default exchange routing by queue name
//! - idempotent declares, `NotFound` for unknown exchanges and queues
//! - one dispatch thread per consumer, serial delivery, auto-ack
//! - competing consumers when several consumers share a queue
//!
//! It also records every call it receives, so tests can assert how many round
//! trips the bus actually made.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::Duration;

use super::channel::{
    BrokerChannel, BrokerError, Delivery, DeliveryCallback, ExchangeKind, ExchangeOptions,
    QueueOptions,
};

/// How long an idle consumer thread waits before re-checking that the broker
/// is still alive.
const IDLE_WAIT: Duration = Duration::from_millis(25);

/// One call received by the broker, in arrival order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BrokerCall {
    ExchangeDeclare {
        exchange: String,
        kind: ExchangeKind,
    },
    QueueDeclare {
        queue: String,
    },
    QueueBind {
        queue: String,
        exchange: String,
        routing_key: String,
    },
    QueueUnbind {
        queue: String,
        exchange: String,
        routing_key: String,
    },
    BasicPublish {
        exchange: String,
        routing_key: String,
    },
    BasicConsume {
        queue: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Binding {
    queue: String,
    routing_key: String,
}

struct BrokerState {
    connected: bool,
    exchanges: HashMap<String, ExchangeKind>,
    bindings: HashMap<String, Vec<Binding>>,
    queues: HashMap<String, VecDeque<Delivery>>,
    consumers: HashMap<String, usize>,
    rejected: HashSet<String>,
    calls: Vec<BrokerCall>,
    next_delivery_tag: u64,
    next_consumer: u64,
}

impl BrokerState {
    fn new() -> Self {
        Self {
            connected: true,
            exchanges: HashMap::new(),
            bindings: HashMap::new(),
            queues: HashMap::new(),
            consumers: HashMap::new(),
            rejected: HashSet::new(),
            calls: Vec::new(),
            next_delivery_tag: 0,
            next_consumer: 0,
        }
    }

    fn record(&mut self, call: BrokerCall) -> Result<(), BrokerError> {
        if !self.connected {
            return Err(BrokerError::ChannelClosed);
        }
        self.calls.push(call);
        Ok(())
    }

    fn require_exchange(&self, exchange: &str) -> Result<ExchangeKind, BrokerError> {
        self.exchanges
            .get(exchange)
            .copied()
            .ok_or_else(|| BrokerError::NotFound {
                resource: "exchange",
                name: exchange.to_string(),
            })
    }

    fn require_queue(&self, queue: &str) -> Result<(), BrokerError> {
        if self.queues.contains_key(queue) {
            Ok(())
        } else {
            Err(BrokerError::NotFound {
                resource: "queue",
                name: queue.to_string(),
            })
        }
    }

    fn route(&self, exchange: &str, routing_key: &str) -> Result<Vec<String>, BrokerError> {
        if exchange.is_empty() {
            // Unroutable messages on the default exchange are dropped silently.
            return Ok(if self.queues.contains_key(routing_key) {
                vec![routing_key.to_string()]
            } else {
                Vec::new()
            });
        }

        let kind = self.require_exchange(exchange)?;
        let mut targets: Vec<String> = Vec::new();
        for binding in self.bindings.get(exchange).into_iter().flatten() {
            let matches = kind == ExchangeKind::Fanout || binding.routing_key == routing_key;
            if matches && !targets.contains(&binding.queue) {
                targets.push(binding.queue.clone());
            }
        }
        Ok(targets)
    }
}

struct Shared {
    state: Mutex<BrokerState>,
    available: Condvar,
}

/// In-memory broker for testing and single-process scenarios.
///
/// Clones share the same broker, so a test can hand one clone to the bus and
/// keep another for inspection.
///
/// ## Example
///
/// ```
/// use sourced_bus::bus::{BrokerChannel, ExchangeKind, ExchangeOptions, InMemoryBroker, QueueOptions};
///
/// let broker = InMemoryBroker::new();
/// let mut channel = broker.clone();
///
/// channel.exchange_declare("order-placed", ExchangeKind::Fanout, ExchangeOptions::default()).unwrap();
/// channel.queue_declare("billing", QueueOptions::default()).unwrap();
/// channel.queue_bind("billing", "order-placed", "").unwrap();
/// channel.basic_publish("order-placed", "", br#"{"id":"1"}"#).unwrap();
///
/// assert_eq!(broker.message_texts("billing"), vec![r#"{"id":"1"}"#.to_string()]);
/// ```
#[derive(Clone)]
pub struct InMemoryBroker {
    shared: Arc<Shared>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(BrokerState::new()),
                available: Condvar::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Payloads currently waiting in a queue, oldest first.
    pub fn messages(&self, queue: &str) -> Vec<Vec<u8>> {
        self.lock()
            .queues
            .get(queue)
            .map(|messages| messages.iter().map(|d| d.payload.clone()).collect())
            .unwrap_or_default()
    }

    /// Queued payloads decoded as (lossy) UTF-8 text.
    pub fn message_texts(&self, queue: &str) -> Vec<String> {
        self.messages(queue)
            .iter()
            .map(|payload| String::from_utf8_lossy(payload).into_owned())
            .collect()
    }

    pub fn queue_len(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map_or(0, VecDeque::len)
    }

    pub fn has_queue(&self, queue: &str) -> bool {
        self.lock().queues.contains_key(queue)
    }

    pub fn exchange_kind(&self, exchange: &str) -> Option<ExchangeKind> {
        self.lock().exchanges.get(exchange).copied()
    }

    /// Names of the queues bound to an exchange, in binding order.
    pub fn bound_queues(&self, exchange: &str) -> Vec<String> {
        self.lock()
            .bindings
            .get(exchange)
            .map(|bindings| bindings.iter().map(|b| b.queue.clone()).collect())
            .unwrap_or_default()
    }

    pub fn is_bound(&self, queue: &str, exchange: &str) -> bool {
        self.lock()
            .bindings
            .get(exchange)
            .is_some_and(|bindings| bindings.iter().any(|b| b.queue == queue))
    }

    pub fn consumer_count(&self, queue: &str) -> usize {
        self.lock().consumers.get(queue).copied().unwrap_or(0)
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<BrokerCall> {
        self.lock().calls.clone()
    }

    /// Number of declare calls (exchange or queue) received for a name.
    pub fn declare_count(&self, name: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| match call {
                BrokerCall::ExchangeDeclare { exchange, .. } => exchange == name,
                BrokerCall::QueueDeclare { queue } => queue == name,
                _ => false,
            })
            .count()
    }

    /// Number of publish calls received for an exchange (or, for the default
    /// exchange, a routing key).
    pub fn publish_count(&self, target: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| match call {
                BrokerCall::BasicPublish {
                    exchange,
                    routing_key,
                } => exchange == target || (exchange.is_empty() && routing_key == target),
                _ => false,
            })
            .count()
    }

    /// Simulate a lost connection: every later call fails with
    /// `ChannelClosed` and consumer threads stop.
    pub fn disconnect(&self) {
        self.lock().connected = false;
        self.shared.available.notify_all();
    }

    /// Reject publishes addressed to `target` (an exchange name, or a queue
    /// name when publishing through the default exchange).
    pub fn fail_publishes_to(&self, target: impl Into<String>) {
        self.lock().rejected.insert(target.into());
    }
}

impl BrokerChannel for InMemoryBroker {
    fn exchange_declare(
        &mut self,
        exchange: &str,
        kind: ExchangeKind,
        _options: ExchangeOptions,
    ) -> Result<(), BrokerError> {
        let mut state = self.lock();
        state.record(BrokerCall::ExchangeDeclare {
            exchange: exchange.to_string(),
            kind,
        })?;

        match state.exchanges.get(exchange).copied() {
            Some(existing) if existing != kind => Err(BrokerError::PreconditionFailed(format!(
                "exchange '{}' already declared as {}",
                exchange,
                existing.as_str()
            ))),
            Some(_) => Ok(()),
            None => {
                state.exchanges.insert(exchange.to_string(), kind);
                Ok(())
            }
        }
    }

    fn queue_declare(&mut self, queue: &str, _options: QueueOptions) -> Result<(), BrokerError> {
        let mut state = self.lock();
        state.record(BrokerCall::QueueDeclare {
            queue: queue.to_string(),
        })?;
        state.queues.entry(queue.to_string()).or_default();
        Ok(())
    }

    fn queue_bind(
        &mut self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        let mut state = self.lock();
        state.record(BrokerCall::QueueBind {
            queue: queue.to_string(),
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
        })?;
        state.require_exchange(exchange)?;
        state.require_queue(queue)?;

        let binding = Binding {
            queue: queue.to_string(),
            routing_key: routing_key.to_string(),
        };
        let bindings = state.bindings.entry(exchange.to_string()).or_default();
        if !bindings.contains(&binding) {
            bindings.push(binding);
        }
        Ok(())
    }

    fn queue_unbind(
        &mut self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        let mut state = self.lock();
        state.record(BrokerCall::QueueUnbind {
            queue: queue.to_string(),
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
        })?;
        state.require_exchange(exchange)?;

        if let Some(bindings) = state.bindings.get_mut(exchange) {
            bindings.retain(|b| !(b.queue == queue && b.routing_key == routing_key));
        }
        Ok(())
    }

    fn basic_publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), BrokerError> {
        let mut state = self.lock();
        state.record(BrokerCall::BasicPublish {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
        })?;

        let target = if exchange.is_empty() { routing_key } else { exchange };
        if state.rejected.contains(target) {
            return Err(BrokerError::Rejected(target.to_string()));
        }

        for queue in state.route(exchange, routing_key)? {
            state.next_delivery_tag += 1;
            let delivery = Delivery {
                delivery_tag: state.next_delivery_tag,
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
                payload: payload.to_vec(),
            };
            if let Some(messages) = state.queues.get_mut(&queue) {
                messages.push_back(delivery);
            }
        }

        drop(state);
        self.shared.available.notify_all();
        Ok(())
    }

    fn basic_consume(
        &mut self,
        queue: &str,
        mut callback: DeliveryCallback,
    ) -> Result<String, BrokerError> {
        let consumer_tag = {
            let mut state = self.lock();
            state.record(BrokerCall::BasicConsume {
                queue: queue.to_string(),
            })?;
            state.require_queue(queue)?;
            state.next_consumer += 1;
            *state.consumers.entry(queue.to_string()).or_default() += 1;
            format!("ctag-{}", state.next_consumer)
        };

        let shared = Arc::downgrade(&self.shared);
        let queue_name = queue.to_string();
        thread::Builder::new()
            .name(format!("consumer:{}", queue))
            .spawn(move || {
                while let Some(delivery) = next_delivery(&shared, &queue_name) {
                    callback(delivery);
                }
            })
            .map_err(|e| BrokerError::ConsumerFailed(e.to_string()))?;

        Ok(consumer_tag)
    }
}

/// Block until a message is available on `queue`, removing it (auto-ack).
///
/// Returns `None` once every broker handle is dropped or the broker is
/// disconnected.
fn next_delivery(shared: &Weak<Shared>, queue: &str) -> Option<Delivery> {
    loop {
        let shared = shared.upgrade()?;
        let mut state = shared.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.connected {
            return None;
        }
        if let Some(delivery) = state.queues.get_mut(queue).and_then(VecDeque::pop_front) {
            return Some(delivery);
        }

        let (state, _) = shared
            .available
            .wait_timeout(state, IDLE_WAIT)
            .unwrap_or_else(PoisonError::into_inner);
        drop(state);
    }
}

//! Process-local mirror of the broker topology the bus has declared.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info};

use super::channel::{
    BrokerChannel, BrokerError, ExchangeKind, ExchangeOptions, QueueOptions, NO_ROUTING_KEY,
};
use crate::naming::EventType;

/// Lifecycle of an event type's exchange with respect to its dead-letter queue.
///
/// ```text
/// (not declared) ──publish/consume──▶ Buffering ──first consume──▶ Live
/// ```
///
/// While `Buffering`, the dead-letter queue is bound and keeps every event
/// published before a consumer exists. The first consumer registration for the
/// event type unbinds it; from then on the exchange is `Live` for every
/// consumer, not only the one that triggered the transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExchangeState {
    Buffering,
    Live,
}

/// Record of which exchanges, queues and bindings already exist on the broker.
///
/// A cache hit skips the broker round trip entirely. Entries are never
/// reconciled against the broker; the cache trusts that whatever it declared
/// still exists until [`TopologyCache::forget`] is called.
#[derive(Debug, Default)]
pub struct TopologyCache {
    exchanges: HashSet<String>,
    queues: HashSet<String>,
    /// (queue, exchange) pairs.
    bindings: HashSet<(String, String)>,
    event_exchanges: HashMap<String, ExchangeState>,
}

impl TopologyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare an exchange unless it is already known. Returns `true` when a
    /// declare call was issued.
    pub fn ensure_exchange<C: BrokerChannel + ?Sized>(
        &mut self,
        channel: &mut C,
        name: &str,
        kind: ExchangeKind,
    ) -> Result<bool, BrokerError> {
        if self.exchanges.contains(name) {
            return Ok(false);
        }

        channel.exchange_declare(name, kind, ExchangeOptions::default())?;
        self.exchanges.insert(name.to_string());
        debug!(exchange = name, kind = kind.as_str(), "declared exchange");
        Ok(true)
    }

    /// Declare a queue unless it is already known, and bind it to `bind_to`
    /// unless that binding is already known. Returns `true` when any broker
    /// call was issued.
    pub fn ensure_queue<C: BrokerChannel + ?Sized>(
        &mut self,
        channel: &mut C,
        name: &str,
        bind_to: Option<&str>,
    ) -> Result<bool, BrokerError> {
        let mut issued = false;

        if !self.queues.contains(name) {
            channel.queue_declare(name, QueueOptions::default())?;
            self.queues.insert(name.to_string());
            debug!(queue = name, "declared queue");
            issued = true;
        }

        if let Some(exchange) = bind_to {
            let binding = (name.to_string(), exchange.to_string());
            if !self.bindings.contains(&binding) {
                channel.queue_bind(name, exchange, NO_ROUTING_KEY)?;
                self.bindings.insert(binding);
                debug!(queue = name, exchange, "bound queue");
                issued = true;
            }
        }

        Ok(issued)
    }

    /// Ensure the fanout exchange of an event type exists. While the exchange
    /// is still buffering, its dead-letter queue is ensured and bound as well.
    pub fn ensure_event_exchange<C: BrokerChannel + ?Sized>(
        &mut self,
        channel: &mut C,
        event_type: &EventType,
    ) -> Result<ExchangeState, BrokerError> {
        let exchange = event_type.exchange();
        let state = self
            .event_exchanges
            .get(exchange)
            .copied()
            .unwrap_or(ExchangeState::Buffering);

        self.ensure_exchange(channel, exchange, ExchangeKind::Fanout)?;
        if state == ExchangeState::Buffering {
            self.ensure_queue(channel, &event_type.dead_letter_queue(), Some(exchange))?;
        }

        self.event_exchanges.insert(exchange.to_string(), state);
        Ok(state)
    }

    /// Move an event type's exchange from `Buffering` to `Live` by unbinding
    /// its dead-letter queue. Messages already parked there stay where they
    /// are. Returns `true` when the unbind was issued, `false` when the
    /// exchange was already live.
    pub fn release_dead_letter<C: BrokerChannel + ?Sized>(
        &mut self,
        channel: &mut C,
        event_type: &EventType,
    ) -> Result<bool, BrokerError> {
        if self.ensure_event_exchange(channel, event_type)? == ExchangeState::Live {
            return Ok(false);
        }

        let exchange = event_type.exchange();
        let dead_letter = event_type.dead_letter_queue();
        channel.queue_unbind(&dead_letter, exchange, NO_ROUTING_KEY)?;
        self.bindings.remove(&(dead_letter.clone(), exchange.to_string()));
        self.event_exchanges
            .insert(exchange.to_string(), ExchangeState::Live);

        info!(exchange, dead_letter = %dead_letter, "released dead-letter buffer");
        Ok(true)
    }

    pub fn exchange_state(&self, exchange: &str) -> Option<ExchangeState> {
        self.event_exchanges.get(exchange).copied()
    }

    pub fn has_exchange(&self, name: &str) -> bool {
        self.exchanges.contains(name)
    }

    pub fn has_queue(&self, name: &str) -> bool {
        self.queues.contains(name)
    }

    pub fn is_bound(&self, queue: &str, exchange: &str) -> bool {
        self.bindings
            .contains(&(queue.to_string(), exchange.to_string()))
    }

    /// Forget every declaration so the next use re-declares it on the broker.
    ///
    /// Exchange states are kept: a live exchange never gets its dead-letter
    /// queue bound again.
    pub fn forget(&mut self) {
        self.exchanges.clear();
        self.queues.clear();
        self.bindings.clear();
    }
}

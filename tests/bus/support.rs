//! Shared events and helpers for bus tests.

use std::sync::{Arc, Mutex, Once};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use sourced_bus::{Consumer, ConsumerStats, DomainEvent};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub id: u32,
}

impl DomainEvent for OrderPlaced {
    const EVENT_NAME: &'static str = "OrderPlaced";
    const EVENT_TYPE: &'static str = "order-placed";
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PaymentFailed {
    pub order_id: u32,
    pub reason: String,
}

impl DomainEvent for PaymentFailed {
    const EVENT_NAME: &'static str = "PaymentFailed";
    const EVENT_TYPE: &'static str = "payment-failed";
}

/// Handler-side record of what a consumer saw.
pub struct Inbox<E> {
    seen: Arc<Mutex<Vec<Option<E>>>>,
}

impl<E: Clone + Send + 'static> Inbox<E> {
    pub fn new() -> Self {
        Self {
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn handler(&self) -> impl FnMut(Option<E>) -> anyhow::Result<()> + Send + 'static {
        let seen = Arc::clone(&self.seen);
        move |message| {
            seen.lock().unwrap().push(message);
            Ok(())
        }
    }

    pub fn seen(&self) -> Vec<Option<E>> {
        self.seen.lock().unwrap().clone()
    }
}

/// Route bus logs to the test harness; `RUST_LOG=sourced_bus=debug` shows them.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Wait until `consumer` has finished processing `count` deliveries.
pub fn settle(consumer: &Consumer, count: usize) -> ConsumerStats {
    init_tracing();
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let stats = consumer.stats();
        let done = stats.handled + stats.quarantined + stats.quarantine_failures;
        if stats.delivered >= count && done >= count {
            return stats;
        }
        assert!(
            Instant::now() < deadline,
            "consumer {} stalled: {:?}",
            consumer.queue(),
            stats
        );
        thread::sleep(Duration::from_millis(5));
    }
}

/// Give consumer threads a moment to pick up anything stray.
pub fn quiesce() {
    thread::sleep(Duration::from_millis(100));
}

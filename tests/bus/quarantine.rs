use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use sourced_bus::bus::QuarantineRecord;
use sourced_bus::{Bus, InMemoryBroker};

use crate::support::{quiesce, settle, OrderPlaced};

fn records(broker: &InMemoryBroker, queue: &str) -> Vec<QuarantineRecord> {
    broker
        .messages(queue)
        .iter()
        .map(|payload| serde_json::from_slice(payload).unwrap())
        .collect()
}

#[test]
fn failed_message_is_quarantined_and_loop_continues() {
    let broker = InMemoryBroker::new();
    let bus = Bus::new(broker.clone());
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let consumer = bus
        .consume("Billing", move |order: Option<OrderPlaced>| {
            counter.fetch_add(1, Ordering::SeqCst);
            match order {
                Some(OrderPlaced { id: 2 }) => anyhow::bail!("ledger is locked"),
                _ => Ok(()),
            }
        })
        .unwrap();

    for id in 1..=3 {
        bus.publish(&OrderPlaced { id }).unwrap();
    }
    let stats = settle(&consumer, 3);
    quiesce();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(stats.handled, 2);
    assert_eq!(stats.quarantined, 1);

    let records = records(&broker, "billing.error");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].description, "ledger is locked");
    assert_eq!(records[0].message, r#"{"id":2}"#);
    assert!(records[0].stack_trace.is_some());
}

#[test]
fn error_queue_is_not_bound_to_the_event_exchange() {
    let broker = InMemoryBroker::new();
    let bus = Bus::new(broker.clone());

    let consumer = bus
        .consume("billing", |_: Option<OrderPlaced>| -> anyhow::Result<()> {
            anyhow::bail!("always")
        })
        .unwrap();
    bus.publish(&OrderPlaced { id: 1 }).unwrap();
    settle(&consumer, 1);

    assert!(broker.has_queue("billing.error"));
    assert!(!broker.is_bound("billing.error", "order-placed"));
    assert_eq!(broker.bound_queues("order-placed"), vec!["billing".to_string()]);
}

#[test]
fn quarantine_failure_is_counted_and_loop_continues() {
    let broker = InMemoryBroker::new();
    let bus = Bus::new(broker.clone());
    broker.fail_publishes_to("billing.error");

    let consumer = bus
        .consume("billing", |order: Option<OrderPlaced>| match order {
            Some(OrderPlaced { id: 1 }) => anyhow::bail!("first one fails"),
            _ => Ok(()),
        })
        .unwrap();
    bus.publish(&OrderPlaced { id: 1 }).unwrap();
    bus.publish(&OrderPlaced { id: 2 }).unwrap();

    let stats = settle(&consumer, 2);
    assert_eq!(stats.quarantine_failures, 1);
    assert_eq!(stats.handled, 1);
    assert_eq!(broker.queue_len("billing.error"), 0);
}

#[test]
fn quarantine_keeps_raw_payload_of_undecodable_message() {
    use sourced_bus::bus::BrokerChannel;

    let broker = InMemoryBroker::new();
    let bus = Bus::new(broker.clone());
    let consumer = bus
        .consume("billing", |order: Option<OrderPlaced>| match order {
            Some(_) => Ok(()),
            None => anyhow::bail!("empty order"),
        })
        .unwrap();

    let mut raw = broker.clone();
    raw.basic_publish("order-placed", "", b"garbage").unwrap();
    settle(&consumer, 1);

    let records = records(&broker, "billing.error");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].message, "garbage");
    assert_eq!(records[0].description, "empty order");
}

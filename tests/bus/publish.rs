use sourced_bus::bus::{BrokerCall, ExchangeKind, ExchangeState};
use sourced_bus::{Bus, BusError, EventType, InMemoryBroker};

use crate::support::{OrderPlaced, PaymentFailed};

#[test]
fn publish_before_any_consumer_is_buffered_in_dead_letter() {
    let broker = InMemoryBroker::new();
    let bus = Bus::new(broker.clone());

    bus.publish(&OrderPlaced { id: 1 }).unwrap();
    bus.publish(&OrderPlaced { id: 2 }).unwrap();

    assert_eq!(broker.exchange_kind("order-placed"), Some(ExchangeKind::Fanout));
    assert!(broker.is_bound("order-placed.dead-letter", "order-placed"));
    assert_eq!(
        broker.message_texts("order-placed.dead-letter"),
        vec![r#"{"id":1}"#, r#"{"id":2}"#]
    );
    assert_eq!(
        bus.exchange_state(&EventType::from_name("OrderPlaced")).unwrap(),
        Some(ExchangeState::Buffering)
    );
}

#[test]
fn topology_is_declared_once_per_event_type() {
    let broker = InMemoryBroker::new();
    let bus = Bus::new(broker.clone());

    for id in 0..5 {
        bus.publish(&OrderPlaced { id }).unwrap();
    }
    bus.publish(&PaymentFailed {
        order_id: 1,
        reason: "card declined".into(),
    })
    .unwrap();

    assert_eq!(broker.declare_count("order-placed"), 1);
    assert_eq!(broker.declare_count("order-placed.dead-letter"), 1);
    assert_eq!(broker.declare_count("payment-failed"), 1);
    assert_eq!(broker.publish_count("order-placed"), 5);
}

#[test]
fn first_publish_declares_then_binds_then_publishes() {
    let broker = InMemoryBroker::new();
    let bus = Bus::new(broker.clone());

    bus.publish(&OrderPlaced { id: 7 }).unwrap();

    assert_eq!(
        broker.calls(),
        vec![
            BrokerCall::ExchangeDeclare {
                exchange: "order-placed".into(),
                kind: ExchangeKind::Fanout,
            },
            BrokerCall::QueueDeclare {
                queue: "order-placed.dead-letter".into(),
            },
            BrokerCall::QueueBind {
                queue: "order-placed.dead-letter".into(),
                exchange: "order-placed".into(),
                routing_key: String::new(),
            },
            BrokerCall::BasicPublish {
                exchange: "order-placed".into(),
                routing_key: String::new(),
            },
        ]
    );
}

#[test]
fn broker_failure_surfaces_to_publisher() {
    let broker = InMemoryBroker::new();
    let bus = Bus::new(broker.clone());
    broker.disconnect();

    let err = bus.publish(&OrderPlaced { id: 1 }).unwrap_err();
    assert!(matches!(err, BusError::Broker(_)));
}

#[test]
fn forgotten_topology_is_redeclared() {
    let broker = InMemoryBroker::new();
    let bus = Bus::new(broker.clone());

    bus.publish(&OrderPlaced { id: 1 }).unwrap();
    bus.forget_topology().unwrap();
    bus.publish(&OrderPlaced { id: 2 }).unwrap();

    assert_eq!(broker.declare_count("order-placed"), 2);
    assert_eq!(broker.queue_len("order-placed.dead-letter"), 2);
}

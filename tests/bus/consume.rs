use sourced_bus::bus::ExchangeState;
use sourced_bus::{Bus, InMemoryBroker, MessageBus};

use crate::support::{quiesce, settle, Inbox, OrderPlaced};

#[test]
fn first_consume_releases_dead_letter_buffer() {
    let broker = InMemoryBroker::new();
    let bus = Bus::new(broker.clone());

    bus.publish(&OrderPlaced { id: 1 }).unwrap();
    let inbox = Inbox::<OrderPlaced>::new();
    let consumer = bus.consume("Billing", inbox.handler()).unwrap();

    assert!(!broker.is_bound("order-placed.dead-letter", "order-placed"));
    assert_eq!(
        bus.exchange_state(consumer.event_type()).unwrap(),
        Some(ExchangeState::Live)
    );

    bus.publish(&OrderPlaced { id: 2 }).unwrap();
    settle(&consumer, 1);

    // Buffered events stay buffered; later ones go to consumers only.
    assert_eq!(broker.message_texts("order-placed.dead-letter"), vec![r#"{"id":1}"#]);
    assert_eq!(inbox.seen(), vec![Some(OrderPlaced { id: 2 })]);
}

#[test]
fn fanout_delivers_every_event_to_every_queue() {
    let broker = InMemoryBroker::new();
    let bus = Bus::new(broker.clone());
    let billing = Inbox::<OrderPlaced>::new();
    let shipping = Inbox::<OrderPlaced>::new();

    let billing_consumer = bus.consume("billing", billing.handler()).unwrap();
    let shipping_consumer = bus.consume("shipping", shipping.handler()).unwrap();

    for id in 0..3 {
        bus.publish(&OrderPlaced { id }).unwrap();
    }
    settle(&billing_consumer, 3);
    settle(&shipping_consumer, 3);

    let expected: Vec<_> = (0..3).map(|id| Some(OrderPlaced { id })).collect();
    assert_eq!(billing.seen(), expected);
    assert_eq!(shipping.seen(), expected);
    assert_eq!(broker.queue_len("order-placed.dead-letter"), 0);
}

#[test]
fn dead_letter_is_unbound_exactly_once() {
    let broker = InMemoryBroker::new();
    let bus = Bus::new(broker.clone());

    bus.consume("a", Inbox::<OrderPlaced>::new().handler()).unwrap();
    bus.consume("b", Inbox::<OrderPlaced>::new().handler()).unwrap();

    let unbinds = broker
        .calls()
        .into_iter()
        .filter(|call| matches!(call, sourced_bus::bus::BrokerCall::QueueUnbind { .. }))
        .count();
    assert_eq!(unbinds, 1);
}

#[test]
fn queue_names_are_kebab_cased() {
    let broker = InMemoryBroker::new();
    let bus = Bus::new(broker.clone());

    let consumer = bus
        .consume("ConfirmEmail", Inbox::<OrderPlaced>::new().handler())
        .unwrap();

    assert_eq!(consumer.queue(), "confirm-email");
    assert_eq!(consumer.error_queue(), "confirm-email.error");
    assert!(broker.has_queue("confirm-email"));
    assert!(!broker.has_queue("ConfirmEmail"));
    assert!(!consumer.consumer_tag().is_empty());
}

#[test]
fn undecodable_message_is_handed_over_as_none() {
    use sourced_bus::bus::BrokerChannel;

    let broker = InMemoryBroker::new();
    let bus = Bus::new(broker.clone());
    let inbox = Inbox::<OrderPlaced>::new();
    let consumer = bus.consume("billing", inbox.handler()).unwrap();

    let mut raw = broker.clone();
    raw.basic_publish("order-placed", "", br#"{"id":"not a number"}"#)
        .unwrap();
    bus.publish(&OrderPlaced { id: 4 }).unwrap();

    let stats = settle(&consumer, 2);
    assert_eq!(stats.decode_failures, 1);
    assert_eq!(stats.handled, 2);
    assert_eq!(inbox.seen(), vec![None, Some(OrderPlaced { id: 4 })]);
    quiesce();
    assert_eq!(broker.queue_len("billing.error"), 0);
}

#[test]
fn works_through_the_message_bus_trait() {
    fn announce(bus: &impl MessageBus, id: u32) {
        bus.publish(&OrderPlaced { id }).unwrap();
    }

    let bus = Bus::new(InMemoryBroker::new());
    let inbox = Inbox::<OrderPlaced>::new();
    let consumer = MessageBus::consume(&bus, "audit", inbox.handler()).unwrap();

    announce(&bus, 11);
    settle(&consumer, 1);
    assert_eq!(inbox.seen(), vec![Some(OrderPlaced { id: 11 })]);
}

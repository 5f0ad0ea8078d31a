use std::thread;

use sourced_bus::{Bus, InMemoryBroker};

use crate::support::{settle, Inbox, OrderPlaced, PaymentFailed};

#[test]
fn concurrent_publishes_are_all_delivered() {
    let broker = InMemoryBroker::new();
    let bus = Bus::new(broker.clone());
    let inbox = Inbox::<OrderPlaced>::new();
    let consumer = bus.consume("billing", inbox.handler()).unwrap();

    let publishers: Vec<_> = (0..8)
        .map(|worker| {
            let bus = bus.clone();
            thread::spawn(move || {
                for n in 0..25 {
                    bus.publish(&OrderPlaced { id: worker * 100 + n }).unwrap();
                }
            })
        })
        .collect();
    for publisher in publishers {
        publisher.join().unwrap();
    }

    settle(&consumer, 200);
    let mut ids: Vec<u32> = inbox.seen().into_iter().flatten().map(|o| o.id).collect();
    ids.sort_unstable();
    let mut expected: Vec<u32> = (0..8)
        .flat_map(|worker| (0..25).map(move |n| worker * 100 + n))
        .collect();
    expected.sort_unstable();
    assert_eq!(ids, expected);
    assert_eq!(broker.declare_count("order-placed"), 1);
}

#[test]
fn concurrent_consumes_for_different_types() {
    let broker = InMemoryBroker::new();
    let bus = Bus::new(broker.clone());

    let orders = {
        let bus = bus.clone();
        thread::spawn(move || {
            let inbox = Inbox::<OrderPlaced>::new();
            let consumer = bus.consume("orders", inbox.handler()).unwrap();
            (inbox, consumer)
        })
    };
    let payments = {
        let bus = bus.clone();
        thread::spawn(move || {
            let inbox = Inbox::<PaymentFailed>::new();
            let consumer = bus.consume("payments", inbox.handler()).unwrap();
            (inbox, consumer)
        })
    };
    let (order_inbox, order_consumer) = orders.join().unwrap();
    let (payment_inbox, payment_consumer) = payments.join().unwrap();

    bus.publish(&OrderPlaced { id: 1 }).unwrap();
    bus.publish(&PaymentFailed {
        order_id: 1,
        reason: "insufficient funds".into(),
    })
    .unwrap();

    settle(&order_consumer, 1);
    settle(&payment_consumer, 1);
    assert_eq!(order_inbox.seen(), vec![Some(OrderPlaced { id: 1 })]);
    assert_eq!(payment_inbox.seen().len(), 1);
    assert!(!broker.is_bound("order-placed.dead-letter", "order-placed"));
    assert!(!broker.is_bound("payment-failed.dead-letter", "payment-failed"));
}

#[test]
fn publish_racing_first_consume_is_never_lost() {
    // Each event lands in the dead-letter buffer or reaches the consumer.
    for _ in 0..20 {
        let broker = InMemoryBroker::new();
        let bus = Bus::new(broker.clone());
        let inbox = Inbox::<OrderPlaced>::new();

        let publisher = {
            let bus = bus.clone();
            thread::spawn(move || {
                for id in 0..10 {
                    bus.publish(&OrderPlaced { id }).unwrap();
                }
            })
        };
        let consumer = bus.consume("billing", inbox.handler()).unwrap();
        publisher.join().unwrap();

        let buffered = broker.queue_len("order-placed.dead-letter");
        let delivered = 10 - buffered;
        settle(&consumer, delivered);
        assert_eq!(inbox.seen().len(), delivered);
    }
}

use serde::{Deserialize, Serialize};
use sourced_bus::naming::to_lower_kebab_case;
use sourced_bus::{Bus, DomainEvent, InMemoryBroker};

use crate::support::{settle, Inbox};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, DomainEvent)]
struct ShipmentDispatchedEvent {
    tracking: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, DomainEvent)]
struct HTTPRequestLogged {
    path: String,
}

#[test]
fn derived_names_match_runtime_kebab_case() {
    assert_eq!(ShipmentDispatchedEvent::EVENT_NAME, "ShipmentDispatchedEvent");
    assert_eq!(ShipmentDispatchedEvent::EVENT_TYPE, "shipment-dispatched-event");
    assert_eq!(HTTPRequestLogged::EVENT_TYPE, "h-t-t-p-request-logged");
    assert_eq!(
        HTTPRequestLogged::EVENT_TYPE,
        to_lower_kebab_case(HTTPRequestLogged::EVENT_NAME)
    );
}

#[test]
fn derived_event_round_trips_over_the_bus() {
    let broker = InMemoryBroker::new();
    let bus = Bus::new(broker.clone());
    let inbox = Inbox::<ShipmentDispatchedEvent>::new();
    let consumer = bus.consume("warehouse", inbox.handler()).unwrap();

    let event = ShipmentDispatchedEvent {
        tracking: "1Z999".into(),
    };
    bus.publish(&event).unwrap();
    settle(&consumer, 1);

    assert_eq!(inbox.seen(), vec![Some(event)]);
    assert!(broker.has_queue("shipment-dispatched-event.dead-letter"));
}

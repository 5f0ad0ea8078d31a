use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::naming::EventType;

/// A typed domain event that can travel over the bus.
///
/// `EVENT_TYPE` names the fanout exchange the event is published to. Both
/// constants are normally produced by `#[derive(DomainEvent)]`, which kebab-cases
/// the type name at compile time. Hand-written impls must keep
/// `EVENT_TYPE == to_lower_kebab_case(EVENT_NAME)` to stay interoperable with
/// other services on the broker.
pub trait DomainEvent: Serialize + DeserializeOwned + Send + 'static {
    /// Structural name of the event, e.g. `UserRegisteredEvent`.
    const EVENT_NAME: &'static str;
    /// Lower-kebab-case channel name, e.g. `user-registered-event`.
    const EVENT_TYPE: &'static str;

    fn event_type() -> EventType {
        EventType::of::<Self>()
    }
}

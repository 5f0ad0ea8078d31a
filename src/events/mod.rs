//! Events shared between services on the bus.

mod user_registered;

pub use user_registered::UserRegisteredEvent;

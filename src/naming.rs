//! Channel naming conventions shared by publishers and consumers.
//!
//! These names are part of the wire contract with other services on the same
//! broker and must not drift:
//!
//! | Resource          | Name                              |
//! |-------------------|-----------------------------------|
//! | Exchange          | `{event-type}`                    |
//! | Dead-letter queue | `{event-type}.dead-letter`        |
//! | Consumer queue    | kebab-cased caller-supplied name  |
//! | Error queue       | `{consumer-queue}.error`          |

use std::fmt;

use crate::DomainEvent;

const DEAD_LETTER_SUFFIX: &str = ".dead-letter";
const ERROR_SUFFIX: &str = ".error";

/// Convert a name to lower-kebab-case.
///
/// Names without any uppercase letter are returned unchanged, so already
/// kebab-cased names pass through. Otherwise existing hyphens are dropped, a
/// hyphen is placed before every uppercase letter except the first one, and
/// the result is lowercased.
///
/// "Uppercase letter" means a character of the Basic Multilingual Plane in
/// the `Lu` general category. Characters that are only case-mapped, such as
/// Roman numerals (`Ⅳ`) and circled letters (`Ⓐ`), do not start a new word,
/// and neither do letters outside the BMP.
///
/// ```
/// use sourced_bus::naming::to_lower_kebab_case;
///
/// assert_eq!(to_lower_kebab_case("UserRegisteredEvent"), "user-registered-event");
/// assert_eq!(to_lower_kebab_case("already-kebab"), "already-kebab");
/// ```
pub fn to_lower_kebab_case(text: &str) -> String {
    if text.trim().is_empty() || !text.chars().any(is_uppercase_letter) {
        return text.to_string();
    }

    let mut result = String::with_capacity(text.len() + 4);
    for (i, ch) in text.chars().filter(|c| *c != '-').enumerate() {
        if is_uppercase_letter(ch) && i > 0 {
            result.push('-');
        }
        result.push(ch);
    }
    result.to_lowercase()
}

/// `Lu` within the BMP: `char::is_uppercase` minus the `Other_Uppercase` symbols.
pub(crate) fn is_uppercase_letter(ch: char) -> bool {
    ch.is_uppercase()
        && u32::from(ch) <= 0xFFFF
        && !matches!(ch, '\u{2160}'..='\u{216F}' | '\u{24B6}'..='\u{24CF}')
}

/// Name of the queue that buffers an event type before its first consumer.
pub fn dead_letter_queue_name(event_type: &str) -> String {
    format!("{}{}", event_type, DEAD_LETTER_SUFFIX)
}

/// Name of the queue that receives quarantined deliveries of a consumer queue.
pub fn error_queue_name(consumer_queue: &str) -> String {
    format!("{}{}", consumer_queue, ERROR_SUFFIX)
}

/// Logical channel identity of an event: the name of its fanout exchange.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventType(String);

impl EventType {
    /// Event type of a statically known event.
    pub fn of<E: DomainEvent>() -> Self {
        EventType(E::EVENT_TYPE.to_string())
    }

    /// Derive an event type from a structural name such as `UserRegisteredEvent`.
    pub fn from_name(name: &str) -> Self {
        EventType(to_lower_kebab_case(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The exchange carrying this event type.
    pub fn exchange(&self) -> &str {
        &self.0
    }

    pub fn dead_letter_queue(&self) -> String {
        dead_letter_queue_name(&self.0)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EventType {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Every broker name a consumer registration touches, computed once.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventRoutes {
    pub event_type: EventType,
    pub dead_letter_queue: String,
    pub queue: String,
    pub error_queue: String,
}

impl EventRoutes {
    /// Routes for consuming `E` from `queue_name`.
    ///
    /// The queue name is kebab-cased independently of the event type, so a
    /// caller passing `ConfirmEmail` ends up consuming from `confirm-email`.
    pub fn for_consumer<E: DomainEvent>(queue_name: &str) -> Self {
        let event_type = EventType::of::<E>();
        let queue = to_lower_kebab_case(queue_name);
        Self {
            dead_letter_queue: event_type.dead_letter_queue(),
            error_queue: error_queue_name(&queue),
            event_type,
            queue,
        }
    }
}

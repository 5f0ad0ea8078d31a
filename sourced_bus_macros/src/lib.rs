mod domain_event;

use proc_macro::TokenStream;

// ============================================================================
// #[derive(DomainEvent)]
// ============================================================================

/// Derive macro that binds a struct or enum to its bus channel names.
///
/// The event type is the lower-kebab-case form of the type name, computed
/// once at compile time instead of on every publish.
///
/// # Usage
///
/// ```ignore
/// #[derive(Serialize, Deserialize, DomainEvent)]
/// struct UserRegisteredEvent {
///     user_id: Uuid,
/// }
///
/// assert_eq!(UserRegisteredEvent::EVENT_NAME, "UserRegisteredEvent");
/// assert_eq!(UserRegisteredEvent::EVENT_TYPE, "user-registered-event");
/// ```
///
/// The generated impl refers to `::sourced_bus::DomainEvent`, so the type must
/// also implement `serde::Serialize` and `serde::de::DeserializeOwned`.
#[proc_macro_derive(DomainEvent)]
pub fn derive_domain_event(input: TokenStream) -> TokenStream {
    domain_event::derive_domain_event(input)
}

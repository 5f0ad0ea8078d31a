use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::codec::{self, CodecError};
use crate::event_log::EventRecord;
use crate::DomainEvent;

/// Raised by the auth service once an account has been created. The
/// notification service consumes it to send the e-mail confirmation link.
///
/// Field names are PascalCase on the wire so other services read the same
/// JSON document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserRegisteredEvent {
    pub user_id: Uuid,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub user_name: Option<String>,
    pub email: String,
    pub validate_email_token: String,
    pub email_confirmed: bool,
    pub lockout_enabled: bool,
    pub lockout_end: Option<DateTime<FixedOffset>>,
    pub phone_number: Option<String>,
    pub phone_number_confirmed: bool,
    pub two_factor_enabled: bool,
}

impl DomainEvent for UserRegisteredEvent {
    const EVENT_NAME: &'static str = "UserRegisteredEvent";
    const EVENT_TYPE: &'static str = "user-registered-event";
}

impl UserRegisteredEvent {
    /// A freshly registered, unconfirmed account.
    pub fn new(
        user_id: Uuid,
        user_name: Option<String>,
        email: impl Into<String>,
        validate_email_token: impl Into<String>,
    ) -> Self {
        Self {
            user_id,
            is_deleted: false,
            created_at: Utc::now(),
            user_name,
            email: email.into(),
            validate_email_token: validate_email_token.into(),
            email_confirmed: false,
            lockout_enabled: true,
            lockout_end: None,
            phone_number: None,
            phone_number_confirmed: false,
            two_factor_enabled: false,
        }
    }

    pub fn stream_name(&self) -> String {
        format!("User-{}", self.user_id)
    }

    /// The event as a single log record typed with its structural name.
    pub fn to_event_records(&self) -> Result<Vec<EventRecord>, CodecError> {
        let data = codec::encode(self)?;
        Ok(vec![EventRecord::new(Self::EVENT_NAME, data)])
    }

    /// Name to greet the user with: the user name, or the e-mail without one.
    pub fn display_name(&self) -> &str {
        self.user_name.as_deref().unwrap_or(&self.email)
    }
}

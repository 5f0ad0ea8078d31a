//! Registration → confirmation e-mail, end to end.
//!
//! Appends a `UserRegisteredEvent` to the event log, publishes it, and lets a
//! notification consumer render the confirmation link. Runs against RabbitMQ
//! when built with `--features amqp` and the `BUS_BROKER_*` variables are set,
//! otherwise against the in-memory broker.
//!
//! ```text
//! RUST_LOG=sourced_bus=debug cargo run --example notification_worker
//! ```

use std::sync::mpsc;
use std::time::Duration;

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use sourced_bus::bus::BrokerChannel;
use sourced_bus::event_log::{EventLog, ExpectedState, InMemoryEventLog};
use sourced_bus::events::UserRegisteredEvent;
use sourced_bus::{Bus, BrokerConfig, InMemoryBroker};

const CONFIRM_EMAIL_QUEUE: &str = "ConfirmEmail";
const WEB_HOST_AND_PORT: &str = "http://localhost:3000";

/// Renders the message a user receives after registering.
struct NotificationSink {
    host_and_port: String,
    sent: mpsc::Sender<String>,
}

impl NotificationSink {
    fn confirmation_link(&self, event: &UserRegisteredEvent) -> String {
        format!(
            "{}/account/email-confirmation?email={}&token={}",
            self.host_and_port,
            STANDARD.encode(event.email.as_bytes()),
            STANDARD.encode(event.validate_email_token.as_bytes()),
        )
    }

    fn notify(&self, event: Option<UserRegisteredEvent>) -> Result<()> {
        let Some(event) = event else {
            warn!("message is empty; skipping e-mail notification");
            return Ok(());
        };

        let body = format!(
            "Hello, {}!\nConfirm your e-mail: {}",
            event.display_name(),
            self.confirmation_link(&event)
        );
        info!(user_id = %event.user_id, to = %event.email, "sending confirmation e-mail");
        self.sent.send(body).context("notification sink closed")?;
        Ok(())
    }
}

/// Record the registration and announce it. If either step fails the account
/// is flagged deleted and the error is returned.
fn register<C: BrokerChannel>(
    bus: &Bus<C>,
    log: &impl EventLog,
    event: &mut UserRegisteredEvent,
) -> Result<()> {
    let announced = event
        .to_event_records()
        .map_err(anyhow::Error::from)
        .and_then(|records| {
            log.append_to_stream(&event.stream_name(), ExpectedState::Any, records)
                .map_err(anyhow::Error::from)
        })
        .and_then(|_| bus.publish(&*event).map_err(anyhow::Error::from));

    if let Err(err) = announced {
        event.is_deleted = true;
        warn!(user_id = %event.user_id, error = %err, "registration rolled back");
        return Err(err);
    }
    Ok(())
}

fn run<C: BrokerChannel>(bus: Bus<C>) -> Result<()> {
    let log = InMemoryEventLog::new();
    let (sent, inbox) = mpsc::channel();
    let sink = NotificationSink {
        host_and_port: WEB_HOST_AND_PORT.to_string(),
        sent,
    };

    let consumer = bus.consume(CONFIRM_EMAIL_QUEUE, move |event: Option<UserRegisteredEvent>| {
        sink.notify(event)
    })?;
    info!(queue = consumer.queue(), "notification worker started");

    let mut event = UserRegisteredEvent::new(
        Uuid::new_v4(),
        Some("ada".to_string()),
        "ada@example.com",
        "CfDJ8Ei1t0k3n",
    );
    register(&bus, &log, &mut event)?;

    let body = inbox
        .recv_timeout(Duration::from_secs(5))
        .context("no notification rendered within 5s")?;
    println!("{body}");
    info!(stats = ?consumer.stats(), "done");
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("sourced_bus=info".parse()?))
        .init();

    match BrokerConfig::from_env() {
        #[cfg(feature = "amqp")]
        Ok(config) => {
            info!(?config, "using RabbitMQ");
            run(Bus::connect(&config)?)
        }
        #[cfg(not(feature = "amqp"))]
        Ok(_) => {
            warn!("broker configured but the amqp feature is off; using the in-memory broker");
            run(Bus::new(InMemoryBroker::new()))
        }
        Err(err) => {
            info!(reason = %err, "no broker configured; using the in-memory broker");
            run(Bus::new(InMemoryBroker::new()))
        }
    }
}

//! RabbitMQ channel backed by lapin.
//!
//! lapin is async; the bus contract is blocking. `AmqpChannel` owns a small
//! tokio runtime and blocks on it for every declare/bind/publish, so callers
//! see a synchronous round trip that returns once the broker has answered.
//! Deliveries are forwarded from the lapin consumer stream to a dedicated OS
//! thread per consumer, which runs the callback serially.
//!
//! Calls are safe from async code too. On a multi-threaded tokio runtime the
//! wait goes through `block_in_place`; on a current-thread runtime it moves to
//! a short-lived helper thread. Either way the calling task's worker is
//! blocked for the round trip, so async services should prefer
//! `spawn_blocking` around bus calls.

use std::future::Future;
use std::sync::mpsc;
use std::thread;

use futures::StreamExt;
use lapin::options::{
    BasicConsumeOptions, BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions,
    QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::uri::{AMQPAuthority, AMQPUri, AMQPUserInfo};
use lapin::{BasicProperties, Connection, ConnectionProperties};
use tokio::runtime::{Builder, Handle, Runtime, RuntimeFlavor};
use tracing::{error, info};

use super::bus::Bus;
use super::channel::{
    BrokerChannel, BrokerError, Delivery, DeliveryCallback, ExchangeKind, ExchangeOptions,
    QueueOptions,
};
use crate::config::BrokerConfig;
use crate::error::BusError;

const CONTENT_TYPE_JSON: &str = "application/json";

/// The channel's private runtime. Shut down in the background on drop, so
/// the channel can be dropped from async code.
struct ChannelRuntime(Option<Runtime>);

impl ChannelRuntime {
    fn build() -> Result<Self, BrokerError> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("sourced-bus-amqp")
            .enable_all()
            .build()
            .map_err(|e| BrokerError::ConnectionFailed(e.to_string()))?;
        Ok(Self(Some(runtime)))
    }

    fn get(&self) -> Result<&Runtime, BrokerError> {
        self.0.as_ref().ok_or(BrokerError::ChannelClosed)
    }

    /// Drive `future` to completion from whatever context the caller is in.
    fn block_on<F>(&self, future: F) -> Result<F::Output, BrokerError>
    where
        F: Future + Send,
        F::Output: Send,
    {
        let runtime = self.get()?;
        match Handle::try_current() {
            Err(_) => Ok(runtime.block_on(future)),
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                Ok(tokio::task::block_in_place(|| runtime.block_on(future)))
            }
            Ok(_) => thread::scope(|scope| {
                thread::Builder::new()
                    .name("sourced-bus-blocking".into())
                    .spawn_scoped(scope, || runtime.block_on(future))
                    .map_err(|e| BrokerError::Blocking(e.to_string()))?
                    .join()
                    .map_err(|_| BrokerError::Blocking("broker call panicked".into()))
            }),
        }
    }
}

impl Drop for ChannelRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.0.take() {
            runtime.shutdown_background();
        }
    }
}

fn amqp_uri(config: &BrokerConfig) -> AMQPUri {
    AMQPUri {
        authority: AMQPAuthority {
            userinfo: AMQPUserInfo {
                username: config.user_name.clone(),
                password: config.password.clone(),
            },
            host: config.host_name.clone(),
            port: config.port,
        },
        vhost: config.virtual_host.clone(),
        ..AMQPUri::default()
    }
}

pub struct AmqpChannel {
    connection: Connection,
    channel: lapin::Channel,
    runtime: ChannelRuntime,
}

impl AmqpChannel {
    /// Open the connection and its single channel. Failure is final: there is
    /// no retry or backoff.
    pub fn connect(config: &BrokerConfig) -> Result<Self, BrokerError> {
        let runtime = ChannelRuntime::build()?;

        let uri = amqp_uri(config);
        let (connection, channel) = runtime
            .block_on(async {
                let connection = Connection::connect_uri(uri, ConnectionProperties::default()).await?;
                let channel = connection.create_channel().await?;
                Ok::<_, lapin::Error>((connection, channel))
            })?
            .map_err(|e| BrokerError::ConnectionFailed(e.to_string()))?;

        info!(
            host = %config.host_name,
            virtual_host = %config.virtual_host,
            "connected to broker"
        );

        Ok(Self {
            connection,
            channel,
            runtime,
        })
    }

    pub fn is_connected(&self) -> bool {
        self.connection.status().connected()
    }
}

fn lapin_kind(kind: ExchangeKind) -> lapin::ExchangeKind {
    match kind {
        ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
        ExchangeKind::Direct => lapin::ExchangeKind::Direct,
    }
}

impl BrokerChannel for AmqpChannel {
    fn exchange_declare(
        &mut self,
        exchange: &str,
        kind: ExchangeKind,
        options: ExchangeOptions,
    ) -> Result<(), BrokerError> {
        let options = ExchangeDeclareOptions {
            durable: options.durable,
            auto_delete: options.auto_delete,
            ..ExchangeDeclareOptions::default()
        };
        self.runtime.block_on(self.channel.exchange_declare(
            exchange,
            lapin_kind(kind),
            options,
            FieldTable::default(),
        ))??;
        Ok(())
    }

    fn queue_declare(&mut self, queue: &str, options: QueueOptions) -> Result<(), BrokerError> {
        let options = QueueDeclareOptions {
            durable: options.durable,
            exclusive: options.exclusive,
            auto_delete: options.auto_delete,
            ..QueueDeclareOptions::default()
        };
        self.runtime
            .block_on(self.channel.queue_declare(queue, options, FieldTable::default()))??;
        Ok(())
    }

    fn queue_bind(
        &mut self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        self.runtime.block_on(self.channel.queue_bind(
            queue,
            exchange,
            routing_key,
            QueueBindOptions::default(),
            FieldTable::default(),
        ))??;
        Ok(())
    }

    fn queue_unbind(
        &mut self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        self.runtime.block_on(self.channel.queue_unbind(
            queue,
            exchange,
            routing_key,
            FieldTable::default(),
        ))??;
        Ok(())
    }

    fn basic_publish(
        &mut self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), BrokerError> {
        let channel = &self.channel;
        self.runtime.block_on(async {
            channel
                .basic_publish(
                    exchange,
                    routing_key,
                    BasicPublishOptions::default(),
                    payload,
                    BasicProperties::default().with_content_type(CONTENT_TYPE_JSON.into()),
                )
                .await?
                .await
        })??;
        Ok(())
    }

    fn basic_consume(
        &mut self,
        queue: &str,
        mut callback: DeliveryCallback,
    ) -> Result<String, BrokerError> {
        let options = BasicConsumeOptions {
            no_ack: true,
            ..BasicConsumeOptions::default()
        };
        let mut consumer = self.runtime.block_on(self.channel.basic_consume(
            queue,
            "",
            options,
            FieldTable::default(),
        ))??;
        let consumer_tag = consumer.tag().as_str().to_string();

        let (tx, rx) = mpsc::channel::<Delivery>();
        let queue_name = queue.to_string();
        self.runtime.get()?.spawn(async move {
            while let Some(next) = consumer.next().await {
                match next {
                    Ok(delivery) => {
                        let delivery = Delivery {
                            delivery_tag: delivery.delivery_tag,
                            exchange: delivery.exchange.as_str().to_string(),
                            routing_key: delivery.routing_key.as_str().to_string(),
                            payload: delivery.data,
                        };
                        if tx.send(delivery).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        error!(queue = %queue_name, error = %err, "consumer stream failed");
                        break;
                    }
                }
            }
        });

        thread::Builder::new()
            .name(format!("consumer:{}", queue))
            .spawn(move || {
                for delivery in rx {
                    callback(delivery);
                }
            })
            .map_err(|e| BrokerError::ConsumerFailed(e.to_string()))?;

        Ok(consumer_tag)
    }
}

impl Bus<AmqpChannel> {
    /// Connect to the broker described by `config` and build a bus over it.
    ///
    /// Like every call on this bus, this blocks until the broker answers. It
    /// may be called from inside a tokio runtime, but it then blocks that
    /// runtime's worker for the round trip.
    pub fn connect(config: &BrokerConfig) -> Result<Self, BusError> {
        Ok(Bus::new(AmqpChannel::connect(config)?))
    }
}

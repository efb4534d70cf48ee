// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Connection and Channel Management
//!
//! The rest of the crate talks to the broker through two traits:
//! [`BrokerConnection`] hands out channels and [`BrokerChannel`] exposes the
//! handful of AMQP methods the pub/sub layer needs. Both are implemented for
//! lapin's `Connection` and `Channel`; tests substitute their own.

use crate::{config::AmqpConfigs, delivery::Delivery, errors::AmqpError, exchange::ExchangeKind};
use async_trait::async_trait;
use futures_util::{stream::BoxStream, StreamExt};
use lapin::{
    options::{
        BasicConsumeOptions, BasicPublishOptions, BasicQosOptions, ExchangeDeclareOptions,
        QueueBindOptions, QueueDeclareOptions,
    },
    types::{FieldTable, LongString},
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use std::sync::Arc;
use tracing::{debug, error};

/// Stream of inbound deliveries for one consumer. Ends when the channel closes.
pub type DeliveryStream = BoxStream<'static, Result<Delivery, AmqpError>>;

/// AMQP reply code for a normal channel shutdown.
const REPLY_SUCCESS: u16 = 200;

/// A connection able to open channels.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Opens a fresh channel owned by the caller.
    ///
    /// # Returns
    /// The new channel, or [`AmqpError::ChannelError`] when the connection
    /// refuses it
    async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>, AmqpError>;
}

/// One exclusive communication context on a connection.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BrokerChannel: Send + Sync {
    /// Declares an exchange. Redeclaring with identical options is a no-op.
    ///
    /// # Parameters
    /// * `name` - Exchange name
    /// * `kind` - Routing behaviour of the exchange
    /// * `options` - Durability and auto-delete flags
    async fn exchange_declare(
        &self,
        name: &str,
        kind: ExchangeKind,
        options: ExchangeDeclareOptions,
    ) -> Result<(), AmqpError>;

    /// Declares a queue.
    ///
    /// # Parameters
    /// * `name` - Queue name; empty asks the broker to generate one
    /// * `options` - Durable, exclusive and auto-delete flags
    /// * `args` - Queue arguments such as `x-dead-letter-exchange`
    ///
    /// # Returns
    /// The resolved queue name, or [`AmqpError::DeclareQueueError`] when the
    /// broker rejects the declaration
    async fn queue_declare(
        &self,
        name: &str,
        options: QueueDeclareOptions,
        args: FieldTable,
    ) -> Result<String, AmqpError>;

    /// Binds `queue` to `exchange`, routing messages whose key matches
    /// `routing_key`.
    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), AmqpError>;

    /// Caps the unacknowledged deliveries pushed to each consumer of this
    /// channel.
    ///
    /// # Parameters
    /// * `prefetch_count` - Maximum deliveries in flight; 0 means unlimited to
    ///   the broker
    async fn basic_qos(&self, prefetch_count: u16) -> Result<(), AmqpError>;

    /// Starts a manual-ack consumer on `queue`.
    ///
    /// # Parameters
    /// * `queue` - Queue to consume from
    /// * `consumer_tag` - Tag identifying the consumer; empty lets the broker
    ///   assign one
    ///
    /// # Returns
    /// A stream yielding each delivery with its acknowledgment token
    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<DeliveryStream, AmqpError>;

    /// Sends `payload` to `exchange` with `routing_key`. No publisher confirm
    /// is awaited.
    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), AmqpError>;

    /// Closes the channel. Unacknowledged deliveries are requeued by the
    /// broker.
    async fn close(&self) -> Result<(), AmqpError>;
}

/// Opens the shared broker connection described by `cfg`.
///
/// The connection is meant to be shared by every publisher and subscription
/// of the process; each of them opens its own channel on it.
///
/// # Parameters
/// * `cfg` - Broker address, credentials and connection name
///
/// # Returns
/// The connection, or [`AmqpError::ConnectionError`] when the broker cannot
/// be reached
pub async fn connect(cfg: &AmqpConfigs) -> Result<Arc<Connection>, AmqpError> {
    debug!("creating amqp connection...");
    let options = ConnectionProperties::default()
        .with_connection_name(LongString::from(cfg.connection_name.clone()));

    match Connection::connect(&cfg.uri(), options).await {
        Ok(conn) => {
            debug!("amqp connected");
            Ok(Arc::new(conn))
        }
        Err(err) => {
            error!(error = err.to_string(), "failure to connect");
            Err(AmqpError::ConnectionError(err.to_string()))
        }
    }
}

#[async_trait]
impl BrokerConnection for Connection {
    async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>, AmqpError> {
        debug!("creating amqp channel...");
        match Connection::create_channel(self).await {
            Ok(channel) => {
                debug!(id = channel.id(), "channel created");
                Ok(Arc::new(channel))
            }
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                Err(AmqpError::ChannelError(err.to_string()))
            }
        }
    }
}

#[async_trait]
impl BrokerChannel for Channel {
    async fn exchange_declare(
        &self,
        name: &str,
        kind: ExchangeKind,
        options: ExchangeDeclareOptions,
    ) -> Result<(), AmqpError> {
        Channel::exchange_declare(self, name, kind.into(), options, FieldTable::default())
            .await
            .map_err(|err| {
                error!(error = err.to_string(), name, "error to declare the exchange");
                AmqpError::DeclareExchangeError(name.to_owned(), err.to_string())
            })
    }

    async fn queue_declare(
        &self,
        name: &str,
        options: QueueDeclareOptions,
        args: FieldTable,
    ) -> Result<String, AmqpError> {
        match Channel::queue_declare(self, name, options, args).await {
            Ok(queue) => Ok(queue.name().to_string()),
            Err(err) => {
                error!(error = err.to_string(), name, "error to declare the queue");
                Err(AmqpError::DeclareQueueError(name.to_owned(), err.to_string()))
            }
        }
    }

    /// Binds `queue` to `exchange`, routing messages whose key matches
    /// `routing_key`.
    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), AmqpError> {
        Channel::queue_bind(
            self,
            queue,
            exchange,
            routing_key,
            QueueBindOptions { nowait: false },
            FieldTable::default(),
        )
        .await
        .map_err(|err| {
            error!(error = err.to_string(), "error to bind queue to exchange");
            AmqpError::BindingExchangeToQueueError(
                exchange.to_owned(),
                queue.to_owned(),
                err.to_string(),
            )
        })
    }

    async fn basic_qos(&self, prefetch_count: u16) -> Result<(), AmqpError> {
        Channel::basic_qos(self, prefetch_count, BasicQosOptions { global: false })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error to configure qos");
                AmqpError::QoSDeclarationError(err.to_string())
            })
    }

    async fn basic_consume(
        &self,
        queue: &str,
        consumer_tag: &str,
    ) -> Result<DeliveryStream, AmqpError> {
        let consumer = Channel::basic_consume(
            self,
            queue,
            consumer_tag,
            BasicConsumeOptions {
                no_local: false,
                no_ack: false,
                exclusive: false,
                nowait: false,
            },
            FieldTable::default(),
        )
        .await
        .map_err(|err| {
            error!(error = err.to_string(), "error to create the consumer");
            AmqpError::ConsumerDeclarationError(queue.to_owned(), err.to_string())
        })?;

        Ok(consumer
            .map(|result| {
                result
                    .map(Delivery::from)
                    .map_err(|err| AmqpError::ConsumerError(err.to_string()))
            })
            .boxed())
    }

    /// Sends `payload` to `exchange` with `routing_key`. No publisher confirm
    /// is awaited.
    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), AmqpError> {
        match Channel::basic_publish(
            self,
            exchange,
            routing_key,
            BasicPublishOptions {
                immediate: false,
                mandatory: false,
            },
            payload,
            properties,
        )
        .await
        {
            // No publisher confirms: the returned confirm is dropped unawaited.
            Ok(_) => Ok(()),
            Err(err) => {
                error!(error = err.to_string(), "error publishing message");
                Err(AmqpError::PublishingError(exchange.to_owned(), err.to_string()))
            }
        }
    }

    async fn close(&self) -> Result<(), AmqpError> {
        Channel::close(self, REPLY_SUCCESS, "OK").await.map_err(|err| {
            error!(error = err.to_string(), "error to close the channel");
            AmqpError::ChannelCloseError(err.to_string())
        })
    }
}

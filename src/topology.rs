// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Provisioning and Topology
//!
//! [`declare_and_bind`] opens a dedicated channel, declares a queue with
//! dead-letter routing and binds it to an exchange. Declarations are
//! idempotent on the broker side: the same parameters resolve to the same
//! queue, conflicting parameters are rejected and surfaced, never retried.

use crate::{
    channel::{BrokerChannel, BrokerConnection},
    errors::AmqpError,
    exchange::ExchangeDefinition,
    queue::{DurabilityClass, QueueDefinition, QueueDescriptor},
};
use lapin::{options::QueueDeclareOptions, types::FieldTable};
use std::sync::Arc;
use tracing::{debug, error};

/// Declares `queue_name` with the default dead-letter exchange and binds it to
/// `exchange` under `binding_key`.
///
/// # Parameters
/// * `conn` - Connection the dedicated channel is opened on
/// * `exchange` - Existing exchange to bind to
/// * `queue_name` - Queue to declare; empty asks the broker for a name
/// * `binding_key` - Routing key or topic pattern
/// * `durability` - Durable or transient queue
///
/// # Returns
/// The channel the queue was declared on, now owned by the caller, together
/// with the resolved queue. On failure the channel is closed and the broker's
/// rejection is returned as a topology error.
pub async fn declare_and_bind(
    conn: &dyn BrokerConnection,
    exchange: &str,
    queue_name: &str,
    binding_key: &str,
    durability: DurabilityClass,
) -> Result<(Arc<dyn BrokerChannel>, QueueDescriptor), AmqpError> {
    let def = QueueDefinition::new(queue_name).durability(durability);
    declare_and_bind_queue(conn, exchange, &def, binding_key).await
}

/// Same as [`declare_and_bind`], for a fully specified [`QueueDefinition`].
pub async fn declare_and_bind_queue(
    conn: &dyn BrokerConnection,
    exchange: &str,
    def: &QueueDefinition,
    binding_key: &str,
) -> Result<(Arc<dyn BrokerChannel>, QueueDescriptor), AmqpError> {
    let channel = conn.create_channel().await?;

    match declare_on(channel.as_ref(), exchange, def, binding_key).await {
        Ok(queue) => Ok((channel, queue)),
        Err(err) => {
            release(channel.as_ref()).await;
            Err(err)
        }
    }
}

async fn declare_on(
    channel: &dyn BrokerChannel,
    exchange: &str,
    def: &QueueDefinition,
    binding_key: &str,
) -> Result<QueueDescriptor, AmqpError> {
    debug!(
        queue = def.name(),
        durability = ?def.durability,
        dead_letter_exchange = %def.dead_letter_exchange,
        "creating queue"
    );

    let name = channel
        .queue_declare(def.name(), def.declare_options(), def.declare_args())
        .await?;

    debug!(
        "binding queue: {} to the exchange: {} with the key: {}",
        name, exchange, binding_key
    );

    channel.queue_bind(&name, exchange, binding_key).await?;

    Ok(QueueDescriptor {
        name,
        durability: def.durability,
        binding_key: binding_key.to_owned(),
        exchange: exchange.to_owned(),
    })
}

/// Declares an exchange on a short-lived channel.
///
/// # Parameters
/// * `conn` - Connection to declare on
/// * `def` - Name, kind and flags of the exchange
pub async fn declare_exchange(
    conn: &dyn BrokerConnection,
    def: &ExchangeDefinition<'_>,
) -> Result<(), AmqpError> {
    let channel = conn.create_channel().await?;

    debug!("creating exchange: {}", def.name);
    let result = channel
        .exchange_declare(def.name, def.kind, def.declare_options())
        .await;
    release(channel.as_ref()).await;

    result
}

/// Declares the dead-letter side of the topology: a durable fanout exchange
/// and a durable queue receiving everything routed to it.
///
/// The queue is declared without a dead-letter exchange of its own.
///
/// # Parameters
/// * `conn` - Connection to declare on
/// * `exchange` - Dead-letter exchange name, as set on subscribed queues
/// * `queue` - Queue collecting the dead-lettered messages
///
/// # Returns
/// The resolved dead-letter queue
pub async fn declare_dead_letter(
    conn: &dyn BrokerConnection,
    exchange: &str,
    queue: &str,
) -> Result<QueueDescriptor, AmqpError> {
    let channel = conn.create_channel().await?;
    let result = declare_dead_letter_on(channel.as_ref(), exchange, queue).await;
    release(channel.as_ref()).await;

    result
}

async fn declare_dead_letter_on(
    channel: &dyn BrokerChannel,
    exchange: &str,
    queue: &str,
) -> Result<QueueDescriptor, AmqpError> {
    let def = ExchangeDefinition::new(exchange).fanout().durable();
    channel
        .exchange_declare(def.name, def.kind, def.declare_options())
        .await?;

    let name = channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                passive: false,
                durable: true,
                exclusive: false,
                auto_delete: false,
                nowait: false,
            },
            FieldTable::default(),
        )
        .await?;
    channel.queue_bind(&name, exchange, "").await?;

    debug!("dead-letter queue: {} bound to: {}", name, exchange);

    Ok(QueueDescriptor {
        name,
        durability: DurabilityClass::Durable,
        binding_key: String::new(),
        exchange: exchange.to_owned(),
    })
}

/// Closes a channel whose owner no longer needs it, logging failures.
pub(crate) async fn release(channel: &dyn BrokerChannel) {
    if let Err(err) = channel.close().await {
        error!(error = err.to_string(), "failure to release channel");
    }
}

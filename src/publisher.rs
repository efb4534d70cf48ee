// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Typed Message Publisher
//!
//! Encodes a value and sends it to an exchange/routing-key pair. Publishing
//! is fire-and-forget: there are no publisher confirms and no local retry, so
//! callers needing at-least-once publishing retry at their own layer.

use crate::{
    channel::BrokerChannel,
    encoding::{Bincode, Encoding, Json},
    errors::AmqpError,
    otel,
};
use lapin::{
    types::{AMQPValue, FieldTable, ShortString},
    BasicProperties,
};
use opentelemetry::Context;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, error};
use uuid::Uuid;

/// Publishes `value` encoded with `encoding`.
///
/// The message carries the encoding's content type, a fresh message id and
/// the current trace context in its headers.
///
/// # Parameters
/// * `channel` - Channel to publish on
/// * `exchange` - Target exchange
/// * `routing_key` - Routing key of the message
/// * `value` - Value to send
/// * `encoding` - Encoding of the payload
///
/// # Returns
/// `Ok(())` once the message is handed to the broker. Encoding failures
/// return [`AmqpError::EncodingError`] before the broker is contacted; send
/// failures return [`AmqpError::PublishingError`].
pub async fn publish<T, E>(
    channel: &dyn BrokerChannel,
    exchange: &str,
    routing_key: &str,
    value: &T,
    encoding: &E,
) -> Result<(), AmqpError>
where
    T: Serialize + ?Sized,
    E: Encoding,
{
    let payload = encoding.encode(value).map_err(|err| {
        error!(error = err.to_string(), exchange, routing_key, "failure to encode message");
        err
    })?;

    let mut headers = BTreeMap::<ShortString, AMQPValue>::default();
    otel::inject(&Context::current(), &mut headers);

    let properties = BasicProperties::default()
        .with_content_type(ShortString::from(encoding.content_type()))
        .with_message_id(ShortString::from(Uuid::new_v4().to_string()))
        .with_headers(FieldTable::from(headers));

    channel
        .basic_publish(exchange, routing_key, &payload, properties)
        .await?;

    debug!(exchange, routing_key, bytes = payload.len(), "message published");
    Ok(())
}

/// Publishes `value` as JSON.
pub async fn publish_json<T>(
    channel: &dyn BrokerChannel,
    exchange: &str,
    routing_key: &str,
    value: &T,
) -> Result<(), AmqpError>
where
    T: Serialize + ?Sized,
{
    publish(channel, exchange, routing_key, value, &Json).await
}

/// Publishes `value` with the binary encoding.
pub async fn publish_bincode<T>(
    channel: &dyn BrokerChannel,
    exchange: &str,
    routing_key: &str,
    value: &T,
) -> Result<(), AmqpError>
where
    T: Serialize + ?Sized,
{
    publish(channel, exchange, routing_key, value, &Bincode).await
}

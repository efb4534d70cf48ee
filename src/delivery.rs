// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Inbound Deliveries and Acknowledgment
//!
//! A [`Delivery`] owns the acknowledgment token of one broker delivery. The
//! token is resolved by [`Delivery::resolve`], which consumes the delivery, so a
//! token can be settled at most once.

use crate::errors::AmqpError;
use async_trait::async_trait;
use lapin::{
    acker::Acker,
    options::{BasicAckOptions, BasicNackOptions},
    BasicProperties,
};
use tracing::error;

/// The handler's verdict on a decoded message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AckOutcome {
    /// Processed; remove the message from the queue.
    Ack,
    /// Transient failure; put the message back on the queue.
    NackRequeue,
    /// Unprocessable; remove it and route it to the dead-letter exchange.
    NackDiscard,
}

/// Raw outcome codes, for handlers that report numeric verdicts
/// (0 = ack, 1 = discard, 2 = requeue).
///
/// Any other code fails closed to [`AckOutcome::NackDiscard`].
impl From<i64> for AckOutcome {
    fn from(code: i64) -> Self {
        match code {
            0 => AckOutcome::Ack,
            2 => AckOutcome::NackRequeue,
            _ => AckOutcome::NackDiscard,
        }
    }
}

/// Settles one broker delivery.
#[async_trait]
pub trait DeliveryAcker: Send + Sync {
    /// Removes the message from its queue.
    async fn ack(&self) -> Result<(), AmqpError>;

    /// Rejects the message.
    ///
    /// # Parameters
    /// * `requeue` - Put it back on the queue when `true`, dead-letter it
    ///   otherwise
    async fn nack(&self, requeue: bool) -> Result<(), AmqpError>;
}

#[async_trait]
impl DeliveryAcker for Acker {
    async fn ack(&self) -> Result<(), AmqpError> {
        Acker::ack(self, BasicAckOptions { multiple: false })
            .await
            .map_err(|err| {
                error!(error = err.to_string(), "error to ack msg");
                AmqpError::AckMessageError(err.to_string())
            })
    }

    async fn nack(&self, requeue: bool) -> Result<(), AmqpError> {
        Acker::nack(
            self,
            BasicNackOptions {
                multiple: false,
                requeue,
            },
        )
        .await
        .map_err(|err| {
            error!(error = err.to_string(), requeue, "error to nack msg");
            AmqpError::NackMessageError(err.to_string())
        })
    }
}

/// An inbound message together with its acknowledgment token.
pub struct Delivery {
    pub exchange: String,
    pub routing_key: String,
    /// Set when the broker delivered this message before without a settlement.
    pub redelivered: bool,
    pub properties: BasicProperties,
    pub data: Vec<u8>,
    acker: Box<dyn DeliveryAcker>,
}

impl Delivery {
    /// Wraps a delivery received from any transport.
    ///
    /// # Parameters
    /// * `acker` - Settles this delivery with the broker; consumed by
    ///   [`Delivery::resolve`]
    pub fn new(
        exchange: &str,
        routing_key: &str,
        redelivered: bool,
        properties: BasicProperties,
        data: Vec<u8>,
        acker: Box<dyn DeliveryAcker>,
    ) -> Delivery {
        Delivery {
            exchange: exchange.to_owned(),
            routing_key: routing_key.to_owned(),
            redelivered,
            properties,
            data,
            acker,
        }
    }

    /// Content type tag set by the publisher, if any.
    pub fn content_type(&self) -> Option<&str> {
        self.properties.content_type().as_ref().map(|ct| ct.as_str())
    }

    /// Settles the delivery according to `outcome`.
    ///
    /// Consumes the delivery, so each token is settled at most once.
    ///
    /// # Returns
    /// `Ok(())` when the broker accepted the settlement, otherwise
    /// [`AmqpError::AckMessageError`] or [`AmqpError::NackMessageError`]
    pub async fn resolve(self, outcome: AckOutcome) -> Result<(), AmqpError> {
        match outcome {
            AckOutcome::Ack => self.acker.ack().await,
            AckOutcome::NackRequeue => self.acker.nack(true).await,
            AckOutcome::NackDiscard => self.acker.nack(false).await,
        }
    }
}

impl From<lapin::message::Delivery> for Delivery {
    fn from(delivery: lapin::message::Delivery) -> Self {
        Delivery {
            exchange: delivery.exchange.to_string(),
            routing_key: delivery.routing_key.to_string(),
            redelivered: delivery.redelivered,
            properties: delivery.properties,
            data: delivery.data,
            acker: Box::new(delivery.acker),
        }
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("exchange", &self.exchange)
            .field("routing_key", &self.routing_key)
            .field("redelivered", &self.redelivered)
            .field("len", &self.data.len())
            .finish()
    }
}

// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types for the Pub/Sub Layer
//!
//! `AmqpError` names the broker operation that failed. Callers that only care
//! about the failure class (transport, topology, encoding, decoding) use
//! [`AmqpError::kind`].

use thiserror::Error;

/// Failure class of an [`AmqpError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connection or channel level failure. Fatal to the affected channel.
    Transport,
    /// Queue or exchange declaration, or a binding, was rejected by the broker.
    Topology,
    /// A value could not be serialized.
    Encoding,
    /// A payload could not be deserialized into the expected type.
    Decoding,
}

/// Represents errors that can occur during AMQP/RabbitMQ operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmqpError {
    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect: {0}")]
    ConnectionError(String),

    /// Error creating a channel from an established connection
    #[error("failure to create a channel: {0}")]
    ChannelError(String),

    /// Error closing a channel
    #[error("failure to close channel: {0}")]
    ChannelCloseError(String),

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`: {1}")]
    DeclareExchangeError(String, String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`: {1}")]
    DeclareQueueError(String, String),

    /// Error binding a queue to an exchange
    #[error("failure to bind queue `{1}` to exchange `{0}`: {2}")]
    BindingExchangeToQueueError(String, String, String),

    /// Error configuring Quality of Service parameters
    #[error("failure to configure qos `{0}`")]
    QoSDeclarationError(String),

    /// Error declaring a consumer on a queue
    #[error("failure to declare consumer on queue `{0}`: {1}")]
    ConsumerDeclarationError(String, String),

    /// Error receiving a delivery from an active consumer
    #[error("failure to consume message `{0}`")]
    ConsumerError(String),

    /// Error publishing a message
    #[error("failure to publish to `{0}`: {1}")]
    PublishingError(String, String),

    /// Error serializing a value before publishing
    #[error("failure to encode payload: {0}")]
    EncodingError(String),

    /// Error parsing a message payload
    #[error("failure to decode payload: {0}")]
    DecodingError(String),

    /// Error acknowledging a message
    #[error("failure to ack message: {0}")]
    AckMessageError(String),

    /// Error negative-acknowledging a message
    #[error("failure to nack message: {0}")]
    NackMessageError(String),
}

impl AmqpError {
    /// Returns the failure class of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AmqpError::DeclareExchangeError(..)
            | AmqpError::DeclareQueueError(..)
            | AmqpError::BindingExchangeToQueueError(..) => ErrorKind::Topology,
            AmqpError::EncodingError(_) => ErrorKind::Encoding,
            AmqpError::DecodingError(_) => ErrorKind::Decoding,
            AmqpError::ConnectionError(_)
            | AmqpError::ChannelError(_)
            | AmqpError::ChannelCloseError(_)
            | AmqpError::QoSDeclarationError(_)
            | AmqpError::ConsumerDeclarationError(..)
            | AmqpError::ConsumerError(_)
            | AmqpError::PublishingError(..)
            | AmqpError::AckMessageError(_)
            | AmqpError::NackMessageError(_) => ErrorKind::Transport,
        }
    }
}

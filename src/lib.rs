// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Typed publish/subscribe over an AMQP broker.
//!
//! Queues are declared through [`topology::declare_and_bind`], values are
//! published with [`publisher::publish`] and consumed with
//! [`subscriber::subscribe`], where a handler's [`AckOutcome`] decides how
//! each delivery is acknowledged.

mod consumer;
mod otel;
#[cfg(test)]
mod testing;

pub mod channel;
pub mod config;
pub mod delivery;
pub mod encoding;
pub mod errors;
pub mod exchange;
pub mod publisher;
pub mod queue;
pub mod routing;
pub mod subscriber;
pub mod topology;

pub use consumer::{Handler, HandlerError};
pub use delivery::AckOutcome;
pub use encoding::{Bincode, Encoding, Json};
pub use errors::{AmqpError, ErrorKind};
pub use queue::{DurabilityClass, QueueDescriptor};
pub use subscriber::{SubscriptionDefinition, SubscriptionHandle};

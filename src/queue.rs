// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Queue Definitions
//!
//! A queue is declared in one of two durability classes and always carries a
//! dead-letter exchange, so discarded messages are redirected instead of lost.

use crate::config::DEFAULT_DEAD_LETTER_EXCHANGE;
use lapin::{
    options::QueueDeclareOptions,
    types::{AMQPValue, FieldTable, LongString, ShortString},
};

/// Queue argument naming the dead-letter exchange
pub const AMQP_HEADERS_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";

/// Persistence and lifetime class of a queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DurabilityClass {
    /// Survives broker restarts; shared; never auto-deleted.
    Durable,
    /// Exclusive to the declaring connection; deleted when it disconnects.
    Transient,
}

/// Definition of a queue with its configuration parameters.
///
/// This struct implements the builder pattern. Whatever the durability class,
/// the declared queue names a dead-letter exchange.
#[derive(Debug, Clone)]
pub struct QueueDefinition {
    pub(crate) name: String,
    pub(crate) durability: DurabilityClass,
    pub(crate) dead_letter_exchange: String,
}

impl QueueDefinition {
    /// Creates a durable queue definition dead-lettering to
    /// [`DEFAULT_DEAD_LETTER_EXCHANGE`].
    ///
    /// # Parameters
    /// * `name` - The name of the queue; empty asks the broker to generate one
    ///
    /// # Returns
    /// A new queue definition
    pub fn new(name: &str) -> QueueDefinition {
        QueueDefinition {
            name: name.to_owned(),
            durability: DurabilityClass::Durable,
            dead_letter_exchange: DEFAULT_DEAD_LETTER_EXCHANGE.to_owned(),
        }
    }

    /// Sets the durability class of the queue.
    ///
    /// # Parameters
    /// * `durability` - [`DurabilityClass::Durable`] or
    ///   [`DurabilityClass::Transient`]
    ///
    /// # Returns
    /// Self for method chaining
    pub fn durability(mut self, durability: DurabilityClass) -> Self {
        self.durability = durability;
        self
    }

    /// Makes the queue durable: shared, surviving broker restarts and never
    /// auto-deleted.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn durable(self) -> Self {
        self.durability(DurabilityClass::Durable)
    }

    /// Makes the queue transient: exclusive to the declaring connection and
    /// deleted when that connection closes.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn transient(self) -> Self {
        self.durability(DurabilityClass::Transient)
    }

    /// Sets the exchange receiving messages rejected without requeue.
    ///
    /// # Parameters
    /// * `exchange` - The dead-letter exchange name
    ///
    /// # Returns
    /// Self for method chaining
    pub fn dead_letter_exchange(mut self, exchange: &str) -> Self {
        self.dead_letter_exchange = exchange.to_owned();
        self
    }

    /// The requested queue name, possibly empty.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn declare_options(&self) -> QueueDeclareOptions {
        match self.durability {
            DurabilityClass::Durable => QueueDeclareOptions {
                passive: false,
                durable: true,
                exclusive: false,
                auto_delete: false,
                nowait: false,
            },
            DurabilityClass::Transient => QueueDeclareOptions {
                passive: false,
                durable: false,
                exclusive: true,
                auto_delete: true,
                nowait: false,
            },
        }
    }

    pub(crate) fn declare_args(&self) -> FieldTable {
        let mut args = FieldTable::default();
        args.insert(
            ShortString::from(AMQP_HEADERS_DEAD_LETTER_EXCHANGE),
            AMQPValue::LongString(LongString::from(self.dead_letter_exchange.clone())),
        );
        args
    }
}

/// A queue as resolved by the broker after declaration and binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDescriptor {
    /// Resolved name; broker-generated when an empty name was declared.
    pub name: String,
    pub durability: DurabilityClass,
    pub binding_key: String,
    pub exchange: String,
}

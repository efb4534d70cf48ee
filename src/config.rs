// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Connection Configuration
//!
//! Settings needed to reach the broker and to shape subscriptions. Values come
//! from an optional `config/amqp` file and `AMQP_*` environment variables,
//! falling back to a local development broker.

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::num::NonZeroU16;

/// Dead-letter exchange configured on every declared queue unless overridden.
pub const DEFAULT_DEAD_LETTER_EXCHANGE: &str = "peril_dlx";

/// Unacknowledged deliveries the broker may push to one consumer.
///
/// A prefetch of zero means "unlimited" to the broker, so the count is
/// non-zero by type.
pub const DEFAULT_PREFETCH_COUNT: NonZeroU16 = match NonZeroU16::new(10) {
    Some(count) => count,
    None => unreachable!(),
};

/// Broker connection and subscription settings.
///
/// Every field has a default (see [`AmqpConfigs::default`]), so a partial
/// configuration file or a handful of environment variables is enough.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AmqpConfigs {
    /// Broker host name.
    pub host: String,
    /// Broker AMQP port.
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Virtual host; empty selects the broker's default vhost.
    pub vhost: String,
    /// Shown in the broker management UI for this connection.
    pub connection_name: String,
    /// Dead-letter exchange set on queues declared by subscriptions.
    pub dead_letter_exchange: String,
    /// Per-subscription prefetch limit. `AMQP_PREFETCH=0` fails to load.
    pub prefetch: NonZeroU16,
}

impl Default for AmqpConfigs {
    fn default() -> Self {
        AmqpConfigs {
            host: "localhost".to_owned(),
            port: 5672,
            user: "guest".to_owned(),
            password: "guest".to_owned(),
            vhost: String::new(),
            connection_name: "amqp-pubsub".to_owned(),
            dead_letter_exchange: DEFAULT_DEAD_LETTER_EXCHANGE.to_owned(),
            prefetch: DEFAULT_PREFETCH_COUNT,
        }
    }
}

impl AmqpConfigs {
    /// Loads settings from `config/amqp.*` (optional) and `AMQP_*` environment
    /// variables. Missing keys keep their default value.
    ///
    /// # Returns
    /// The merged settings, or a [`ConfigError`] when a value cannot be parsed
    /// into its field, including a prefetch of zero
    pub fn load() -> Result<AmqpConfigs, ConfigError> {
        Config::builder()
            .add_source(File::with_name("config/amqp").required(false))
            .add_source(Environment::with_prefix("AMQP").try_parsing(true))
            .build()?
            .try_deserialize()
    }

    /// Renders the `amqp://` URI for these settings.
    ///
    /// # Returns
    /// A URI suitable for [`crate::channel::connect`]
    pub fn uri(&self) -> String {
        format!(
            "amqp://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.vhost
        )
    }
}

// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Subscription Engine
//!
//! [`subscribe`] provisions the queue, applies the prefetch limit, opens a
//! manual-ack consumer and spawns one task that runs the delivery loop. Setup
//! failures are returned before any task is spawned. Once running, a
//! subscription owns its channel exclusively and shares nothing with other
//! subscriptions.

use crate::{
    channel::{BrokerChannel, BrokerConnection, DeliveryStream},
    config::{AmqpConfigs, DEFAULT_DEAD_LETTER_EXCHANGE, DEFAULT_PREFETCH_COUNT},
    consumer::{consume, Handler},
    delivery::AckOutcome,
    encoding::{Bincode, Encoding, Json},
    errors::AmqpError,
    queue::{DurabilityClass, QueueDefinition, QueueDescriptor},
    topology::{declare_and_bind_queue, release},
};
use futures_util::StreamExt;
use opentelemetry::global;
use serde::de::DeserializeOwned;
use std::{marker::PhantomData, num::NonZeroU16, sync::Arc};
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, error, info};

/// Everything needed to establish one subscription.
///
/// Built with the builder pattern: [`SubscriptionDefinition::new`] takes the
/// required parts, the remaining settings have defaults.
#[derive(Debug, Clone)]
pub struct SubscriptionDefinition<'s> {
    pub(crate) exchange: &'s str,
    pub(crate) queue_name: &'s str,
    pub(crate) binding_key: &'s str,
    pub(crate) durability: DurabilityClass,
    pub(crate) dead_letter_exchange: String,
    pub(crate) prefetch: NonZeroU16,
    pub(crate) consumer_tag: String,
    pub(crate) decode_failure: AckOutcome,
}

impl<'s> SubscriptionDefinition<'s> {
    /// Creates a subscription on `queue_name`, bound to `exchange` with
    /// `binding_key`.
    ///
    /// Defaults: prefetch of 10, broker-assigned consumer tag, undecodable
    /// messages discarded to the dead-letter exchange.
    ///
    /// # Parameters
    /// * `exchange` - Exchange the queue is bound to; it must already exist
    /// * `queue_name` - Queue to declare, or empty for a broker-generated name
    /// * `binding_key` - Routing key or topic pattern for the binding
    /// * `durability` - Whether the queue is shared and persistent, or
    ///   exclusive to the connection
    ///
    /// # Returns
    /// A new subscription definition
    pub fn new(
        exchange: &'s str,
        queue_name: &'s str,
        binding_key: &'s str,
        durability: DurabilityClass,
    ) -> Self {
        SubscriptionDefinition {
            exchange,
            queue_name,
            binding_key,
            durability,
            dead_letter_exchange: DEFAULT_DEAD_LETTER_EXCHANGE.to_owned(),
            prefetch: DEFAULT_PREFETCH_COUNT,
            consumer_tag: String::new(),
            decode_failure: AckOutcome::NackDiscard,
        }
    }

    /// Sets the dead-letter exchange of the subscribed queue.
    ///
    /// # Parameters
    /// * `exchange` - Exchange receiving discarded messages
    ///
    /// # Returns
    /// Self for method chaining
    pub fn dead_letter_exchange(mut self, exchange: &str) -> Self {
        self.dead_letter_exchange = exchange.to_owned();
        self
    }

    /// Sets the maximum unacknowledged deliveries in flight for this
    /// subscription.
    ///
    /// # Parameters
    /// * `prefetch` - Prefetch count; zero is unrepresentable since the broker
    ///   reads it as no limit at all
    ///
    /// # Returns
    /// Self for method chaining
    pub fn prefetch(mut self, prefetch: NonZeroU16) -> Self {
        self.prefetch = prefetch;
        self
    }

    /// Sets the consumer tag. Empty lets the broker assign one.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn consumer_tag(mut self, tag: &str) -> Self {
        self.consumer_tag = tag.to_owned();
        self
    }

    /// Sets the outcome applied to deliveries whose payload cannot be decoded.
    ///
    /// # Parameters
    /// * `outcome` - [`AckOutcome::NackDiscard`] by default; use
    ///   [`AckOutcome::NackRequeue`] when decode failures are expected to be
    ///   transient, e.g. during a rolling deploy
    ///
    /// # Returns
    /// Self for method chaining
    pub fn on_decode_failure(mut self, outcome: AckOutcome) -> Self {
        self.decode_failure = outcome;
        self
    }

    /// Takes dead-letter exchange and prefetch from the loaded configuration.
    ///
    /// # Returns
    /// Self for method chaining
    pub fn configs(self, cfg: &AmqpConfigs) -> Self {
        self.dead_letter_exchange(&cfg.dead_letter_exchange)
            .prefetch(cfg.prefetch)
    }

    fn queue_definition(&self) -> QueueDefinition {
        QueueDefinition::new(self.queue_name)
            .durability(self.durability)
            .dead_letter_exchange(&self.dead_letter_exchange)
    }
}

/// Why a delivery loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopExit {
    Stopped,
    StreamClosed,
}

/// A running subscription.
///
/// Dropping the handle detaches the delivery loop, which then runs until its
/// channel closes. [`SubscriptionHandle::shutdown`] stops it explicitly.
pub struct SubscriptionHandle {
    queue: QueueDescriptor,
    channel: Arc<dyn BrokerChannel>,
    stop: watch::Sender<bool>,
    task: JoinHandle<LoopExit>,
}

impl SubscriptionHandle {
    /// The queue this subscription consumes from, with its resolved name.
    pub fn queue(&self) -> &QueueDescriptor {
        &self.queue
    }

    /// Whether the delivery loop has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the loop after the in-flight delivery is settled, then closes the
    /// channel. Unsettled prefetched deliveries go back to the queue.
    ///
    /// # Returns
    /// `Ok(())` once the loop has exited and the channel is closed, or the
    /// close error. A close failure is ignored when the loop had already ended
    /// because the broker closed the delivery stream.
    pub async fn shutdown(self) -> Result<(), AmqpError> {
        let _ = self.stop.send(true);
        let exit = match self.task.await {
            Ok(exit) => exit,
            Err(err) => {
                error!(error = err.to_string(), queue = %self.queue.name, "subscription task failed");
                LoopExit::Stopped
            }
        };

        match self.channel.close().await {
            Ok(()) => {}
            Err(err) if exit == LoopExit::StreamClosed => {
                debug!(error = err.to_string(), queue = %self.queue.name, "channel already closed");
            }
            Err(err) => {
                error!(error = err.to_string(), queue = %self.queue.name, "failure to close subscription channel");
                return Err(err);
            }
        }

        info!(queue = %self.queue.name, "subscription stopped");
        Ok(())
    }
}

/// Establishes a subscription and starts its delivery loop.
///
/// Setup runs in order: declare and bind the queue, apply the prefetch limit,
/// open a manual-ack consumer. The first failure aborts setup and releases
/// the channel. Decoded values are then passed to `handler`, whose outcome
/// decides how each delivery is settled.
///
/// # Parameters
/// * `conn` - Connection the subscription opens its own channel on
/// * `def` - Queue, binding and consumer settings
/// * `encoding` - Decoder for every delivery payload
/// * `handler` - Application callback
///
/// # Returns
/// A handle on the running subscription, or the setup error
pub async fn subscribe<T, E, H>(
    conn: &dyn BrokerConnection,
    def: &SubscriptionDefinition<'_>,
    encoding: E,
    handler: H,
) -> Result<SubscriptionHandle, AmqpError>
where
    T: DeserializeOwned + Send + 'static,
    E: Encoding,
    H: Handler<T>,
{
    let (channel, queue) =
        declare_and_bind_queue(conn, def.exchange, &def.queue_definition(), def.binding_key).await?;

    let stream = match start_consumer(channel.as_ref(), &queue, def).await {
        Ok(stream) => stream,
        Err(err) => {
            release(channel.as_ref()).await;
            return Err(err);
        }
    };

    let (stop, stop_rx) = watch::channel(false);
    let worker = DeliveryLoop {
        queue: queue.name.clone(),
        encoding,
        handler,
        decode_failure: def.decode_failure,
        _value: PhantomData::<fn() -> T>,
    };
    let task = tokio::spawn(worker.run(stream, stop_rx));

    info!(
        queue = %queue.name,
        exchange = %queue.exchange,
        binding_key = %queue.binding_key,
        "subscription started"
    );

    Ok(SubscriptionHandle {
        queue,
        channel,
        stop,
        task,
    })
}

/// [`subscribe`] with the JSON encoding.
pub async fn subscribe_json<T, H>(
    conn: &dyn BrokerConnection,
    def: &SubscriptionDefinition<'_>,
    handler: H,
) -> Result<SubscriptionHandle, AmqpError>
where
    T: DeserializeOwned + Send + 'static,
    H: Handler<T>,
{
    subscribe(conn, def, Json, handler).await
}

/// [`subscribe`] with the binary encoding.
pub async fn subscribe_bincode<T, H>(
    conn: &dyn BrokerConnection,
    def: &SubscriptionDefinition<'_>,
    handler: H,
) -> Result<SubscriptionHandle, AmqpError>
where
    T: DeserializeOwned + Send + 'static,
    H: Handler<T>,
{
    subscribe(conn, def, Bincode, handler).await
}

async fn start_consumer(
    channel: &dyn BrokerChannel,
    queue: &QueueDescriptor,
    def: &SubscriptionDefinition<'_>,
) -> Result<DeliveryStream, AmqpError> {
    channel.basic_qos(def.prefetch.get()).await?;
    debug!(queue = %queue.name, prefetch = def.prefetch.get(), "qos configured");

    channel.basic_consume(&queue.name, &def.consumer_tag).await
}

struct DeliveryLoop<T, E, H> {
    queue: String,
    encoding: E,
    handler: H,
    decode_failure: AckOutcome,
    _value: PhantomData<fn() -> T>,
}

impl<T, E, H> DeliveryLoop<T, E, H>
where
    T: DeserializeOwned + Send + 'static,
    E: Encoding,
    H: Handler<T>,
{
    async fn run(self, mut stream: DeliveryStream, mut stop: watch::Receiver<bool>) -> LoopExit {
        let tracer = global::tracer("amqp consumer");

        loop {
            tokio::select! {
                biased;

                _ = stopped(&mut stop) => {
                    debug!(queue = %self.queue, "stop requested");
                    return LoopExit::Stopped;
                }

                next = stream.next() => match next {
                    Some(Ok(delivery)) => {
                        if let Err(err) = consume(
                            &tracer,
                            delivery,
                            &self.encoding,
                            &self.handler,
                            self.decode_failure,
                        )
                        .await
                        {
                            error!(error = err.to_string(), queue = %self.queue, "error consume msg");
                        }
                    }
                    Some(Err(err)) => {
                        error!(error = err.to_string(), queue = %self.queue, "errors consume msg");
                    }
                    None => {
                        debug!(queue = %self.queue, "delivery stream closed");
                        return LoopExit::StreamClosed;
                    }
                },
            }
        }
    }
}

/// Resolves once a stop is requested. Pends forever if the handle was dropped.
async fn stopped(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow_and_update() {
            return;
        }
        if stop.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

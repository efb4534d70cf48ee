// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! In-memory broker used by the unit tests.
//!
//! Implements direct, fanout and topic routing, exclusive queues, per-consumer
//! prefetch, manual acknowledgment and dead-lettering closely enough to drive
//! the pub/sub layer end to end without a RabbitMQ server.

use crate::{
    channel::{BrokerChannel, BrokerConnection, DeliveryStream},
    delivery::{Delivery, DeliveryAcker},
    errors::AmqpError,
    exchange::ExchangeKind,
    queue::AMQP_HEADERS_DEAD_LETTER_EXCHANGE,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    options::{ExchangeDeclareOptions, QueueDeclareOptions},
    types::{AMQPValue, FieldTable},
    BasicProperties,
};
use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::mpsc;

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Settled {
    Ack,
    Requeue,
    Discard,
}

#[derive(Debug, Clone)]
struct Message {
    exchange: String,
    routing_key: String,
    properties: BasicProperties,
    data: Vec<u8>,
    redelivered: bool,
}

struct Queue {
    durable: bool,
    exclusive: bool,
    auto_delete: bool,
    owner: u64,
    dead_letter_exchange: Option<String>,
    ready: VecDeque<Message>,
}

struct Binding {
    exchange: String,
    queue: String,
    key: String,
}

struct ChannelState {
    connection: u64,
    prefetch: u16,
    closed: bool,
}

struct Consumer {
    queue: String,
    channel: u64,
    prefetch: u16,
    unacked: usize,
    sender: mpsc::UnboundedSender<Result<Delivery, AmqpError>>,
}

struct Outstanding {
    consumer: u64,
    queue: String,
    message: Message,
}

#[derive(Default)]
struct BrokerState {
    next_id: u64,
    exchanges: HashMap<String, ExchangeKind>,
    queues: HashMap<String, Queue>,
    bindings: Vec<Binding>,
    channels: HashMap<u64, ChannelState>,
    consumers: HashMap<u64, Consumer>,
    outstanding: HashMap<u64, Outstanding>,
    settled: Vec<(Settled, Vec<u8>)>,
    dead_letters: Vec<Vec<u8>>,
    rejected_settlements: usize,
}

impl BrokerState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn open_channel(&self, id: u64) -> Result<&ChannelState, AmqpError> {
        match self.channels.get(&id) {
            Some(ch) if !ch.closed => Ok(ch),
            _ => Err(AmqpError::ChannelError("channel is closed".into())),
        }
    }

    fn route(&self, exchange: &str, routing_key: &str) -> Result<Vec<String>, String> {
        if exchange.is_empty() {
            return Ok(self
                .queues
                .contains_key(routing_key)
                .then(|| routing_key.to_owned())
                .into_iter()
                .collect());
        }

        let kind = self
            .exchanges
            .get(exchange)
            .ok_or_else(|| format!("NOT_FOUND - no exchange '{exchange}'"))?;

        let mut queues: Vec<String> = self
            .bindings
            .iter()
            .filter(|b| b.exchange == exchange)
            .filter(|b| match kind {
                ExchangeKind::Direct => b.key == routing_key,
                ExchangeKind::Fanout => true,
                ExchangeKind::Topic => topic_matches(&b.key, routing_key),
            })
            .map(|b| b.queue.clone())
            .collect();
        queues.sort();
        queues.dedup();

        Ok(queues)
    }
}

/// AMQP topic matching: `*` is exactly one word, `#` zero or more.
pub(crate) fn topic_matches(pattern: &str, key: &str) -> bool {
    fn matches(pattern: &[&str], key: &[&str]) -> bool {
        match (pattern.first(), key.first()) {
            (None, None) => true,
            (Some(&"#"), _) => {
                matches(&pattern[1..], key) || (!key.is_empty() && matches(pattern, &key[1..]))
            }
            (Some(&"*"), Some(_)) => matches(&pattern[1..], &key[1..]),
            (Some(p), Some(k)) if p == k => matches(&pattern[1..], &key[1..]),
            _ => false,
        }
    }

    let pattern: Vec<&str> = pattern.split('.').collect();
    let key: Vec<&str> = key.split('.').collect();
    matches(&pattern, &key)
}

type Shared = Arc<Mutex<BrokerState>>;

fn enqueue(shared: &Shared, state: &mut BrokerState, queue: &str, message: Message, front: bool) {
    if let Some(q) = state.queues.get_mut(queue) {
        if front {
            q.ready.push_front(message);
        } else {
            q.ready.push_back(message);
        }
    }
    pump(shared, state, queue);
}

/// Pushes ready messages to consumers with spare prefetch capacity.
fn pump(shared: &Shared, state: &mut BrokerState, queue: &str) {
    loop {
        let Some(consumer_id) = state
            .consumers
            .iter()
            .filter(|(_, c)| c.queue == queue)
            .filter(|(_, c)| c.prefetch == 0 || c.unacked < c.prefetch as usize)
            .map(|(id, _)| *id)
            .min()
        else {
            return;
        };

        let Some(message) = state.queues.get_mut(queue).and_then(|q| q.ready.pop_front()) else {
            return;
        };

        let tag = state.next_id();
        let delivery = Delivery::new(
            &message.exchange,
            &message.routing_key,
            message.redelivered,
            message.properties.clone(),
            message.data.clone(),
            Box::new(FakeAcker {
                state: shared.clone(),
                tag,
            }),
        );

        let consumer = state.consumers.get_mut(&consumer_id).expect("consumer exists");
        if consumer.sender.send(Ok(delivery)).is_err() {
            state.consumers.remove(&consumer_id);
            if let Some(q) = state.queues.get_mut(queue) {
                q.ready.push_front(message);
            }
            continue;
        }

        consumer.unacked += 1;
        state.outstanding.insert(
            tag,
            Outstanding {
                consumer: consumer_id,
                queue: queue.to_owned(),
                message,
            },
        );
    }
}

fn settle(shared: &Shared, state: &mut BrokerState, tag: u64, how: Settled) -> Result<(), AmqpError> {
    let Some(outstanding) = state.outstanding.remove(&tag) else {
        state.rejected_settlements += 1;
        return Err(AmqpError::AckMessageError(format!(
            "PRECONDITION_FAILED - unknown delivery tag {tag}"
        )));
    };

    if let Some(consumer) = state.consumers.get_mut(&outstanding.consumer) {
        consumer.unacked -= 1;
    }
    state.settled.push((how, outstanding.message.data.clone()));

    match how {
        Settled::Ack => {}
        Settled::Requeue => {
            let mut message = outstanding.message;
            message.redelivered = true;
            if let Some(q) = state.queues.get_mut(&outstanding.queue) {
                q.ready.push_front(message);
            }
        }
        Settled::Discard => {
            let dlx = state
                .queues
                .get(&outstanding.queue)
                .and_then(|q| q.dead_letter_exchange.clone());
            if let Some(dlx) = dlx {
                state.dead_letters.push(outstanding.message.data.clone());
                if let Ok(targets) = state.route(&dlx, &outstanding.message.routing_key) {
                    for target in targets {
                        enqueue(shared, state, &target, outstanding.message.clone(), false);
                    }
                }
            }
        }
    }

    pump(shared, state, &outstanding.queue);
    Ok(())
}

struct FakeAcker {
    state: Shared,
    tag: u64,
}

#[async_trait]
impl DeliveryAcker for FakeAcker {
    async fn ack(&self) -> Result<(), AmqpError> {
        let mut state = self.state.lock().unwrap();
        settle(&self.state, &mut state, self.tag, Settled::Ack)
    }

    async fn nack(&self, requeue: bool) -> Result<(), AmqpError> {
        let how = if requeue { Settled::Requeue } else { Settled::Discard };
        let mut state = self.state.lock().unwrap();
        settle(&self.state, &mut state, self.tag, how)
    }
}

/// Handle on the whole fake broker, for setup and inspection.
#[derive(Clone, Default)]
pub(crate) struct FakeBroker {
    state: Shared,
}

impl FakeBroker {
    pub(crate) fn new() -> FakeBroker {
        FakeBroker::default()
    }

    pub(crate) fn exchange(&self, name: &str, kind: ExchangeKind) {
        self.state
            .lock()
            .unwrap()
            .exchanges
            .insert(name.to_owned(), kind);
    }

    pub(crate) fn connect(&self) -> FakeConnection {
        let id = self.state.lock().unwrap().next_id();
        FakeConnection {
            id,
            state: self.state.clone(),
        }
    }

    /// Publishes raw bytes, bypassing any encoding.
    pub(crate) fn publish_raw(&self, exchange: &str, routing_key: &str, data: &[u8]) {
        let mut state = self.state.lock().unwrap();
        let targets = state.route(exchange, routing_key).unwrap();
        for target in targets {
            let message = Message {
                exchange: exchange.to_owned(),
                routing_key: routing_key.to_owned(),
                properties: BasicProperties::default(),
                data: data.to_vec(),
                redelivered: false,
            };
            enqueue(&self.state, &mut state, &target, message, false);
        }
    }

    pub(crate) fn has_queue(&self, name: &str) -> bool {
        self.state.lock().unwrap().queues.contains_key(name)
    }

    pub(crate) fn queue_count(&self) -> usize {
        self.state.lock().unwrap().queues.len()
    }

    pub(crate) fn exchange_kind(&self, name: &str) -> Option<ExchangeKind> {
        self.state.lock().unwrap().exchanges.get(name).copied()
    }

    /// Messages waiting in `queue` that no consumer holds.
    pub(crate) fn ready(&self, queue: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .queues
            .get(queue)
            .map(|q| q.ready.len())
            .unwrap_or_default()
    }

    /// Messages delivered from `queue` and not yet settled.
    pub(crate) fn unacked(&self, queue: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .outstanding
            .values()
            .filter(|o| o.queue == queue)
            .count()
    }

    pub(crate) fn settled(&self) -> Vec<(Settled, Vec<u8>)> {
        self.state.lock().unwrap().settled.clone()
    }

    pub(crate) fn dead_letters(&self) -> Vec<Vec<u8>> {
        self.state.lock().unwrap().dead_letters.clone()
    }

    /// Settlements attempted on deliveries that were already settled.
    pub(crate) fn rejected_settlements(&self) -> usize {
        self.state.lock().unwrap().rejected_settlements
    }

    pub(crate) fn consumer_count(&self, queue: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .consumers
            .values()
            .filter(|c| c.queue == queue)
            .count()
    }
}

pub(crate) struct FakeConnection {
    id: u64,
    state: Shared,
}

impl FakeConnection {
    /// Drops every channel of this connection and deletes its exclusive queues.
    pub(crate) fn disconnect(&self) {
        let mut state = self.state.lock().unwrap();
        let channels: Vec<u64> = state
            .channels
            .iter()
            .filter(|(_, ch)| ch.connection == self.id)
            .map(|(id, _)| *id)
            .collect();
        for channel in channels {
            close_channel(&self.state, &mut state, channel);
        }
        let owner = self.id;
        state.queues.retain(|_, q| !(q.exclusive && q.owner == owner));
    }
}

fn close_channel(shared: &Shared, state: &mut BrokerState, channel: u64) {
    if let Some(ch) = state.channels.get_mut(&channel) {
        ch.closed = true;
    }

    let consumers: Vec<u64> = state
        .consumers
        .iter()
        .filter(|(_, c)| c.channel == channel)
        .map(|(id, _)| *id)
        .collect();
    for id in &consumers {
        state.consumers.remove(id);
    }

    let orphaned: Vec<u64> = state
        .outstanding
        .iter()
        .filter(|(_, o)| consumers.contains(&o.consumer))
        .map(|(tag, _)| *tag)
        .collect();
    for tag in orphaned {
        if let Some(o) = state.outstanding.remove(&tag) {
            let mut message = o.message;
            message.redelivered = true;
            enqueue(shared, state, &o.queue, message, true);
        }
    }
}

#[async_trait]
impl BrokerConnection for FakeConnection {
    async fn create_channel(&self) -> Result<Arc<dyn BrokerChannel>, AmqpError> {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id();
        state.channels.insert(
            id,
            ChannelState {
                connection: self.id,
                prefetch: 0,
                closed: false,
            },
        );

        Ok(Arc::new(FakeChannel {
            id,
            connection: self.id,
            state: self.state.clone(),
        }))
    }
}

pub(crate) struct FakeChannel {
    id: u64,
    connection: u64,
    state: Shared,
}

fn long_string(args: &FieldTable, key: &str) -> Option<String> {
    match args.inner().get(key) {
        Some(AMQPValue::LongString(value)) => Some(String::from_utf8_lossy(value.as_bytes()).into_owned()),
        _ => None,
    }
}

#[async_trait]
impl BrokerChannel for FakeChannel {
    async fn exchange_declare(
        &self,
        name: &str,
        kind: ExchangeKind,
        _options: ExchangeDeclareOptions,
    ) -> Result<(), AmqpError> {
        let mut state = self.state.lock().unwrap();
        state.open_channel(self.id)?;

        match state.exchanges.get(name) {
            Some(existing) if *existing != kind => Err(AmqpError::DeclareExchangeError(
                name.to_owned(),
                "PRECONDITION_FAILED - inequivalent arg 'type'".into(),
            )),
            _ => {
                state.exchanges.insert(name.to_owned(), kind);
                Ok(())
            }
        }
    }

    async fn queue_declare(
        &self,
        name: &str,
        options: QueueDeclareOptions,
        args: FieldTable,
    ) -> Result<String, AmqpError> {
        let mut state = self.state.lock().unwrap();
        state.open_channel(self.id)?;

        let name = if name.is_empty() {
            format!("amq.gen-{}", uuid::Uuid::new_v4())
        } else {
            name.to_owned()
        };
        let dead_letter_exchange = long_string(&args, AMQP_HEADERS_DEAD_LETTER_EXCHANGE);

        if let Some(existing) = state.queues.get(&name) {
            if existing.exclusive && existing.owner != self.connection {
                return Err(AmqpError::DeclareQueueError(
                    name,
                    "RESOURCE_LOCKED - cannot obtain exclusive access to locked queue".into(),
                ));
            }
            if existing.durable != options.durable
                || existing.exclusive != options.exclusive
                || existing.auto_delete != options.auto_delete
                || existing.dead_letter_exchange != dead_letter_exchange
            {
                return Err(AmqpError::DeclareQueueError(
                    name,
                    "PRECONDITION_FAILED - inequivalent arg".into(),
                ));
            }
            return Ok(name);
        }

        state.queues.insert(
            name.clone(),
            Queue {
                durable: options.durable,
                exclusive: options.exclusive,
                auto_delete: options.auto_delete,
                owner: self.connection,
                dead_letter_exchange,
                ready: VecDeque::new(),
            },
        );
        Ok(name)
    }

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), AmqpError> {
        let mut state = self.state.lock().unwrap();
        state.open_channel(self.id)?;

        let bind_error = |reason: &str| {
            AmqpError::BindingExchangeToQueueError(exchange.to_owned(), queue.to_owned(), reason.to_owned())
        };
        if !state.exchanges.contains_key(exchange) {
            return Err(bind_error("NOT_FOUND - no exchange"));
        }
        if !state.queues.contains_key(queue) {
            return Err(bind_error("NOT_FOUND - no queue"));
        }

        let exists = state
            .bindings
            .iter()
            .any(|b| b.exchange == exchange && b.queue == queue && b.key == routing_key);
        if !exists {
            state.bindings.push(Binding {
                exchange: exchange.to_owned(),
                queue: queue.to_owned(),
                key: routing_key.to_owned(),
            });
        }
        Ok(())
    }

    async fn basic_qos(&self, prefetch_count: u16) -> Result<(), AmqpError> {
        let mut state = self.state.lock().unwrap();
        state.open_channel(self.id)?;
        if let Some(ch) = state.channels.get_mut(&self.id) {
            ch.prefetch = prefetch_count;
        }
        Ok(())
    }

    async fn basic_consume(
        &self,
        queue: &str,
        _consumer_tag: &str,
    ) -> Result<DeliveryStream, AmqpError> {
        let mut state = self.state.lock().unwrap();
        let prefetch = state.open_channel(self.id)?.prefetch;
        if !state.queues.contains_key(queue) {
            return Err(AmqpError::ConsumerDeclarationError(
                queue.to_owned(),
                "NOT_FOUND - no queue".into(),
            ));
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let id = state.next_id();
        state.consumers.insert(
            id,
            Consumer {
                queue: queue.to_owned(),
                channel: self.id,
                prefetch,
                unacked: 0,
                sender,
            },
        );
        pump(&self.state, &mut state, queue);

        Ok(futures_util::stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|item| (item, receiver))
        })
        .boxed())
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
        properties: BasicProperties,
    ) -> Result<(), AmqpError> {
        let mut state = self.state.lock().unwrap();
        state
            .open_channel(self.id)
            .map_err(|err| AmqpError::PublishingError(exchange.to_owned(), err.to_string()))?;

        let targets = state
            .route(exchange, routing_key)
            .map_err(|reason| AmqpError::PublishingError(exchange.to_owned(), reason))?;
        for target in targets {
            let message = Message {
                exchange: exchange.to_owned(),
                routing_key: routing_key.to_owned(),
                properties: properties.clone(),
                data: payload.to_vec(),
                redelivered: false,
            };
            enqueue(&self.state, &mut state, &target, message, false);
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), AmqpError> {
        let mut state = self.state.lock().unwrap();
        state.open_channel(self.id)?;
        close_channel(&self.state, &mut state, self.id);
        Ok(())
    }
}

/// Polls `condition` until it holds, failing the test after two seconds.
pub(crate) async fn wait_until(mut condition: impl FnMut() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    assert!(waited.is_ok(), "condition not reached in time");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_wildcards() {
        assert!(topic_matches("war.*", "war.bob"));
        assert!(!topic_matches("war.*", "war"));
        assert!(!topic_matches("war.*", "war.bob.extra"));
        assert!(topic_matches("army_moves.#", "army_moves"));
        assert!(topic_matches("#", "game_logs.alice"));
        assert!(!topic_matches("pause", "pause.alice"));
    }
}

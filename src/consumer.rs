// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Per-Delivery Processing
//!
//! Every delivery goes through the same pipeline: decode, invoke the handler,
//! settle the acknowledgment token exactly once. Nothing in here may stop the
//! subscription loop; decode errors, handler errors and handler panics all
//! end in a concrete outcome.

use crate::{
    delivery::{AckOutcome, Delivery},
    encoding::Encoding,
    errors::AmqpError,
    otel,
};
use async_trait::async_trait;
use futures_util::FutureExt;
use opentelemetry::{
    global::BoxedTracer,
    trace::{Span, Status},
};
use serde::de::DeserializeOwned;
use std::{borrow::Cow, future::Future, panic::AssertUnwindSafe};
use thiserror::Error;
use tracing::{debug, error, warn};

/// Failure reported by a handler instead of an outcome.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// Worth retrying; the message is requeued.
    #[error("transient handler failure: {0}")]
    Transient(String),
    /// Retrying cannot help; the message is dead-lettered.
    #[error("permanent handler failure: {0}")]
    Permanent(String),
}

impl HandlerError {
    /// The acknowledgment applied when a handler fails with this error.
    pub fn outcome(&self) -> AckOutcome {
        match self {
            HandlerError::Transient(_) => AckOutcome::NackRequeue,
            HandlerError::Permanent(_) => AckOutcome::NackDiscard,
        }
    }
}

/// Application callback receiving decoded values.
///
/// Must tolerate duplicates: requeued and redelivered messages reach the
/// handler again.
///
/// Async closures returning an [`AckOutcome`], or a raw `i64` outcome code,
/// implement this trait directly.
#[async_trait]
pub trait Handler<T>: Send + Sync + 'static {
    /// Handles one decoded value.
    ///
    /// # Parameters
    /// * `value` - The decoded message payload
    ///
    /// # Returns
    /// The outcome to settle the delivery with, or a [`HandlerError`] whose
    /// [`HandlerError::outcome`] is applied instead
    async fn handle(&self, value: T) -> Result<AckOutcome, HandlerError>;
}

#[async_trait]
impl<T, F, Fut, O> Handler<T> for F
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = O> + Send + 'static,
    O: Into<AckOutcome> + 'static,
{
    async fn handle(&self, value: T) -> Result<AckOutcome, HandlerError> {
        Ok(self(value).await.into())
    }
}

/// Decodes, handles and settles one delivery, returning the applied outcome.
///
/// Only a failure to settle the delivery with the broker is returned as an
/// error.
pub(crate) async fn consume<T, E, H>(
    tracer: &BoxedTracer,
    delivery: Delivery,
    encoding: &E,
    handler: &H,
    on_decode_failure: AckOutcome,
) -> Result<AckOutcome, AmqpError>
where
    T: DeserializeOwned + Send + 'static,
    E: Encoding,
    H: Handler<T>,
{
    let (_ctx, mut span) = otel::new_span(&delivery.properties, tracer, &delivery.routing_key);

    debug!(
        "received: {} - exchange: {}",
        delivery.routing_key, delivery.exchange,
    );

    let outcome = match encoding.decode::<T>(&delivery.data) {
        Err(err) => {
            warn!(
                error = err.to_string(),
                routing_key = %delivery.routing_key,
                outcome = ?on_decode_failure,
                "failed to decode message"
            );
            span.record_error(&err);
            span.set_status(Status::Error {
                description: Cow::from("failed to decode message"),
            });
            on_decode_failure
        }
        Ok(value) => match AssertUnwindSafe(handler.handle(value)).catch_unwind().await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(err)) => {
                warn!(
                    error = err.to_string(),
                    routing_key = %delivery.routing_key,
                    "handler failed"
                );
                span.record_error(&err);
                err.outcome()
            }
            Err(_) => {
                error!(routing_key = %delivery.routing_key, "handler panicked");
                span.set_status(Status::Error {
                    description: Cow::from("handler panicked"),
                });
                AckOutcome::NackDiscard
            }
        },
    };

    let routing_key = delivery.routing_key.clone();
    match delivery.resolve(outcome).await {
        Ok(()) => {
            debug!(%routing_key, ?outcome, "message settled");
            if outcome == AckOutcome::Ack {
                span.set_status(Status::Ok);
            }
            Ok(outcome)
        }
        Err(err) => {
            error!(error = err.to_string(), %routing_key, ?outcome, "failure to settle message");
            span.record_error(&err);
            span.set_status(Status::Error {
                description: Cow::from("failure to settle message"),
            });
            Err(err)
        }
    }
}

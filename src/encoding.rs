// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Wire Encodings
//!
//! An [`Encoding`] maps typed values to payload bytes and back. [`Json`] is
//! self-describing and safe across heterogeneous consumers. [`Bincode`] is
//! compact but both ends must share the exact type definition.

use crate::errors::AmqpError;
use bincode::Options;
use serde::{de::DeserializeOwned, Serialize};

/// Content type of [`Json`] payloads
pub const JSON_CONTENT_TYPE: &str = "application/json";
/// Content type of [`Bincode`] payloads
pub const BINCODE_CONTENT_TYPE: &str = "application/x-bincode";

/// Largest payload the binary decoder accepts.
const BINCODE_SIZE_LIMIT: u64 = 16 * 1024 * 1024;

/// A stateless, bidirectional payload encoding.
pub trait Encoding: Send + Sync + 'static {
    /// Informational tag stamped on published messages.
    fn content_type(&self) -> &'static str;

    /// Serializes `value` into payload bytes.
    ///
    /// # Returns
    /// The payload, or [`AmqpError::EncodingError`] when the value has no
    /// representation in this encoding
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, AmqpError>;

    /// Deserializes payload bytes into a `T`.
    ///
    /// Never panics on malformed input.
    ///
    /// # Returns
    /// The value, or [`AmqpError::DecodingError`] when the payload is not a
    /// valid encoding of `T`
    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, AmqpError>;
}

/// Structured-text encoding via `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Json;

impl Encoding for Json {
    fn content_type(&self) -> &'static str {
        JSON_CONTENT_TYPE
    }

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, AmqpError> {
        serde_json::to_vec(value).map_err(|err| AmqpError::EncodingError(err.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, AmqpError> {
        serde_json::from_slice(data).map_err(|err| AmqpError::DecodingError(err.to_string()))
    }
}

/// Compact binary encoding via `bincode`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bincode;

impl Bincode {
    // Length prefixes are checked against the limit before allocating, so a
    // corrupt payload cannot request an unbounded buffer.
    fn options() -> impl Options {
        bincode::DefaultOptions::new().with_limit(BINCODE_SIZE_LIMIT)
    }
}

impl Encoding for Bincode {
    fn content_type(&self) -> &'static str {
        BINCODE_CONTENT_TYPE
    }

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>, AmqpError> {
        Self::options()
            .serialize(value)
            .map_err(|err| AmqpError::EncodingError(err.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, AmqpError> {
        Self::options()
            .deserialize(data)
            .map_err(|err| AmqpError::DecodingError(err.to_string()))
    }
}

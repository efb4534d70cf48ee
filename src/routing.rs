// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Exchange names, routing keys and shared wire types of the game's message
//! namespace.

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Direct exchange carrying server-wide commands such as pause.
pub const EXCHANGE_PERIL_DIRECT: &str = "peril_direct";
/// Topic exchange carrying per-player game traffic.
pub const EXCHANGE_PERIL_TOPIC: &str = "peril_topic";
pub const EXCHANGE_PERIL_DEAD_LETTER: &str = crate::config::DEFAULT_DEAD_LETTER_EXCHANGE;
pub const QUEUE_PERIL_DEAD_LETTER: &str = "peril_dlq";

pub const PAUSE_KEY: &str = "pause";
pub const ARMY_MOVES_PREFIX: &str = "army_moves";
pub const WAR_RECOGNITIONS_PREFIX: &str = "war";
pub const GAME_LOG_SLUG: &str = "game_logs";

/// Joins a routing-key prefix and a suffix: `war` + `bob` gives `war.bob`.
pub fn routing_key(prefix: &str, suffix: &str) -> String {
    format!("{prefix}.{suffix}")
}

/// Topic pattern matching exactly one word after `prefix`.
pub fn any_one(prefix: &str) -> String {
    routing_key(prefix, "*")
}

/// Server-wide pause toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlayingState {
    pub is_paused: bool,
}

/// Log line published with the binary encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GameLog {
    pub current_time: SystemTime,
    pub message: String,
    pub username: String,
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Control-channel command vocabulary.
//!
//! Every command is a [`Dictionary`] packed onto channel 0. Requests carry a
//! `code` and a caller-chosen `key`; responses echo the `key` back. EVENT
//! commands are unsolicited and carry no `key`.
//!
//! | code | request fields | response |
//! |------|----------------|----------|
//! | LOOKUP (5) | alias, type, create | RESULT: alias, type, channel |
//! | SUBSCRIBE (1) / UNSUBSCRIBE (2) | channel | OK |
//! | WATCH (3) / UNWATCH (4) | channel | OK |
//! | SUBSCRIBE_ALIAS (6) | channel (alias) | OK: alias, channel_id |
//! | CREATE_CHANNEL_WITH_ALIAS (7), CREATE_CHANNEL (8) | channel (alias), type | OK |
//! | SET_NAME (9) | name | OK |
//! | GET_NAME (10) | fid | RESULT: fid, name |
//!
//! Failures are `ERROR (-1)` with an `error` string.

use std::fmt;

use crate::message::{ChannelId, Dictionary, Message, CONTROL_CHANNEL};

// ============================================================================
// Keys
// ============================================================================

pub const KEY_CODE: &str = "code";
pub const KEY_KEY: &str = "key";
pub const KEY_ERROR: &str = "error";
pub const KEY_ALIAS: &str = "alias";
pub const KEY_TYPE: &str = "type";
pub const KEY_CHANNEL: &str = "channel";
pub const KEY_CHANNEL_ID: &str = "channel_id";
pub const KEY_CREATE: &str = "create";
pub const KEY_SUBSCRIBERS: &str = "subscribers";
pub const KEY_NAME: &str = "name";
pub const KEY_FID: &str = "fid";

// ============================================================================
// Error messages
// ============================================================================

pub const ERR_ILLEGAL_CHANNEL: &str = "Channel argument not provided or illegal";
pub const ERR_NO_CHANNEL: &str = "Channel does not exist";
pub const ERR_TYPE_MISMATCH: &str = "Channel type does not match";
pub const ERR_ALREADY_SUBSCRIBED: &str = "Already subscribed";
pub const ERR_NOT_SUBSCRIBED: &str = "Not subscribed";
pub const ERR_ALREADY_WATCHING: &str = "Already watching";
pub const ERR_NOT_WATCHING: &str = "Not watching";
pub const ERR_NO_CLIENT: &str = "Client does not exist";
pub const ERR_UNHANDLED: &str = "Message unhandled";

// ============================================================================
// Command codes
// ============================================================================

/// Integer command codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum CommandCode {
    Unknown = -4,
    Event = -3,
    Result = -2,
    Error = -1,
    Ok = 0,
    Subscribe = 1,
    Unsubscribe = 2,
    Watch = 3,
    Unwatch = 4,
    Lookup = 5,
    SubscribeAlias = 6,
    CreateChannelWithAlias = 7,
    CreateChannel = 8,
    SetName = 9,
    GetName = 10,
}

impl CommandCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Map a wire code; unrecognized values become `Unknown`.
    pub fn from_i32(code: i32) -> Self {
        match code {
            -3 => CommandCode::Event,
            -2 => CommandCode::Result,
            -1 => CommandCode::Error,
            0 => CommandCode::Ok,
            1 => CommandCode::Subscribe,
            2 => CommandCode::Unsubscribe,
            3 => CommandCode::Watch,
            4 => CommandCode::Unwatch,
            5 => CommandCode::Lookup,
            6 => CommandCode::SubscribeAlias,
            7 => CommandCode::CreateChannelWithAlias,
            8 => CommandCode::CreateChannel,
            9 => CommandCode::SetName,
            10 => CommandCode::GetName,
            _ => CommandCode::Unknown,
        }
    }

    /// Code of a command dictionary (`Unknown` when absent).
    pub fn of(command: &Dictionary) -> Self {
        Self::from_i32(command.get_i32(KEY_CODE, CommandCode::Unknown.as_i32()))
    }

    /// Responses (OK, RESULT, ERROR) correlate with a request key.
    pub fn is_response(self) -> bool {
        matches!(
            self,
            CommandCode::Ok | CommandCode::Result | CommandCode::Error
        )
    }
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self, self.as_i32())
    }
}

// ============================================================================
// Watch events
// ============================================================================

/// Kind of an EVENT command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A connection subscribed
    Subscribe,
    /// A connection unsubscribed
    Unsubscribe,
    /// Current state, sent to a fresh watcher
    Summary,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Subscribe => "subscribe",
            EventKind::Unsubscribe => "unsubscribe",
            EventKind::Summary => "summary",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "subscribe" => Some(EventKind::Subscribe),
            "unsubscribe" => Some(EventKind::Unsubscribe),
            "summary" => Some(EventKind::Summary),
            _ => None,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Builders
// ============================================================================

/// Empty command with `code` set.
pub fn command(code: CommandCode) -> Dictionary {
    let mut command = Dictionary::new();
    command.set_i32(KEY_CODE, code.as_i32());
    command
}

/// Pack a command onto the control channel.
pub fn to_message(command: &Dictionary) -> Message {
    Message::pack(CONTROL_CHANNEL, command)
}

pub fn error_response(key: i32, message: &str) -> Dictionary {
    let mut response = command(CommandCode::Error);
    response.set_str(KEY_ERROR, message);
    response.set_i32(KEY_KEY, key);
    response
}

pub fn ok_response(key: i32) -> Dictionary {
    let mut response = command(CommandCode::Ok);
    response.set_i32(KEY_KEY, key);
    response
}

/// EVENT describing the subscriber count of `channel`.
pub fn event(channel: ChannelId, subscribers: usize, kind: EventKind) -> Dictionary {
    let mut event = command(CommandCode::Event);
    event.set_i64(KEY_CHANNEL, i64::from(channel));
    event.set_i64(KEY_SUBSCRIBERS, subscribers as i64);
    event.set_str(KEY_TYPE, kind.as_str());
    event
}

pub fn lookup_request(alias: &str, type_name: &str, create: bool) -> Dictionary {
    let mut request = command(CommandCode::Lookup);
    request.set_str(KEY_ALIAS, alias);
    request.set_str(KEY_TYPE, type_name);
    request.set_bool(KEY_CREATE, create);
    request
}

/// SUBSCRIBE / UNSUBSCRIBE / WATCH / UNWATCH request.
pub fn channel_request(code: CommandCode, channel: ChannelId) -> Dictionary {
    let mut request = command(code);
    request.set_i64(KEY_CHANNEL, i64::from(channel));
    request
}

pub fn set_name_request(name: &str) -> Dictionary {
    let mut request = command(CommandCode::SetName);
    request.set_str(KEY_NAME, name);
    request
}

pub fn get_name_request(fid: u64) -> Dictionary {
    let mut request = command(CommandCode::GetName);
    request.set_i64(KEY_FID, fid as i64);
    request
}

/// Channel id field of a command, if present and in range.
pub fn channel_of(command: &Dictionary, key: &str) -> Option<ChannelId> {
    command
        .get(key)
        .and_then(|value| value.trim().parse::<i64>().ok())
        .and_then(|value| ChannelId::try_from(value).ok())
}

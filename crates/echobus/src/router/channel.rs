// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Channel table of the router.
//!
//! Channels are created on demand and live for the whole router lifetime.
//! Ids start at 1 (0 is the control channel) and aliases map 1:1 to ids.

use std::collections::{BTreeSet, HashMap};

use crate::message::ChannelId;

/// Router-local identifier of an accepted connection.
pub type ConnectionId = u64;

/// First id handed out to data channels.
pub const FIRST_CHANNEL_ID: ChannelId = 1;

/// A named, typed delivery topic.
#[derive(Debug, Clone)]
pub struct Channel {
    id: ChannelId,
    alias: String,
    type_name: String,
    /// Connection that created the channel (kept after it disconnects)
    owner: ConnectionId,
    subscribers: BTreeSet<ConnectionId>,
    watchers: BTreeSet<ConnectionId>,
}

impl Channel {
    fn new(id: ChannelId, alias: &str, type_name: &str, owner: ConnectionId) -> Self {
        Self {
            id,
            alias: alias.to_string(),
            type_name: type_name.to_string(),
            owner,
            subscribers: BTreeSet::new(),
            watchers: BTreeSet::new(),
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Type tag; empty until a lookup or creation names one.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn owner(&self) -> ConnectionId {
        self.owner
    }

    /// Check a requested type against the stored one.
    ///
    /// An empty request matches anything. An untyped channel adopts the
    /// first non-empty type it is asked for.
    pub fn match_type(&mut self, requested: &str) -> bool {
        if requested.is_empty() || requested == self.type_name {
            return true;
        }
        if self.type_name.is_empty() {
            log::debug!(
                "[router] channel {} ({}) typed as {}",
                self.id,
                self.alias,
                requested
            );
            self.type_name = requested.to_string();
            return true;
        }
        false
    }

    pub fn subscribers(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.subscribers.iter().copied()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_subscribed(&self, connection: ConnectionId) -> bool {
        self.subscribers.contains(&connection)
    }

    /// Returns `false` if already subscribed.
    pub fn subscribe(&mut self, connection: ConnectionId) -> bool {
        self.subscribers.insert(connection)
    }

    /// Returns `false` if not subscribed.
    pub fn unsubscribe(&mut self, connection: ConnectionId) -> bool {
        self.subscribers.remove(&connection)
    }

    pub fn watchers(&self) -> impl Iterator<Item = ConnectionId> + '_ {
        self.watchers.iter().copied()
    }

    pub fn is_watching(&self, connection: ConnectionId) -> bool {
        self.watchers.contains(&connection)
    }

    /// Returns `false` if already watching.
    pub fn watch(&mut self, connection: ConnectionId) -> bool {
        self.watchers.insert(connection)
    }

    /// Returns `false` if not watching.
    pub fn unwatch(&mut self, connection: ConnectionId) -> bool {
        self.watchers.remove(&connection)
    }
}

/// All channels known to the router, indexed by id and alias.
#[derive(Debug)]
pub struct ChannelRegistry {
    channels: HashMap<ChannelId, Channel>,
    aliases: HashMap<String, ChannelId>,
    next_id: ChannelId,
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            channels: HashMap::new(),
            aliases: HashMap::new(),
            next_id: FIRST_CHANNEL_ID,
        }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn get(&self, id: ChannelId) -> Option<&Channel> {
        self.channels.get(&id)
    }

    pub fn get_mut(&mut self, id: ChannelId) -> Option<&mut Channel> {
        self.channels.get_mut(&id)
    }

    /// Channel id bound to `alias`.
    pub fn find(&self, alias: &str) -> Option<ChannelId> {
        self.aliases.get(alias).copied()
    }

    /// Id of `alias`, creating the channel if needed.
    ///
    /// An existing channel is returned unchanged.
    pub fn create(&mut self, alias: &str, type_name: &str, owner: ConnectionId) -> ChannelId {
        if let Some(id) = self.find(alias) {
            return id;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.channels
            .insert(id, Channel::new(id, alias, type_name, owner));
        self.aliases.insert(alias.to_string(), id);
        log::info!(
            "[router] created channel {} ({}, type {:?}) for connection {}",
            id,
            alias,
            type_name,
            owner
        );
        id
    }

    /// Drop `connection` from every subscriber and watcher set.
    ///
    /// Returns the channels it was subscribed to, so watchers can be told.
    pub fn remove_connection(&mut self, connection: ConnectionId) -> Vec<ChannelId> {
        let mut unsubscribed = Vec::new();
        for channel in self.channels.values_mut() {
            channel.unwatch(connection);
            if channel.unsubscribe(connection) {
                unsubscribed.push(channel.id);
            }
        }
        unsubscribed.sort_unstable();
        unsubscribed
    }

    /// Iterate channels in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &Channel> {
        self.channels.values()
    }
}

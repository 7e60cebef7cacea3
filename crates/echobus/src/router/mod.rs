// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Channel broker.
//!
//! The [`Router`] is the listening-socket handler of a [`Reactor`]. Every
//! accepted socket becomes a [`RouterConnection`] handler. Data frames are
//! fanned out to the subscribers of their channel; channel-0 frames are
//! control commands (see [`crate::protocol`]).
//!
//! # Architecture
//!
//! ```text
//!             Reactor
//!   +------------+-----------------+
//!   |            |                 |
//! Router    RouterConnection  RouterConnection ...
//! (accept)     |  recv_all()
//!              v
//!        Router::dispatch --+-- channel 0 --> handle_command --> events + response
//!                           +-- channel n --> fan out to subscribers' queues
//! ```
//!
//! Locking: the router state lock is always taken before a connection lock,
//! and no callback runs while either is held.
//!
//! [`Reactor`]: crate::reactor::Reactor

pub mod channel;

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

pub use channel::{Channel, ChannelRegistry, ConnectionId};

use crate::config::EchoConfig;
use crate::message::{ChannelId, Dictionary, Message, CONTROL_CHANNEL};
use crate::protocol::{
    self, CommandCode, EventKind, ERR_ALREADY_SUBSCRIBED, ERR_ALREADY_WATCHING,
    ERR_ILLEGAL_CHANNEL, ERR_NOT_SUBSCRIBED, ERR_NOT_WATCHING, ERR_NO_CHANNEL, ERR_NO_CLIENT,
    ERR_TYPE_MISMATCH, ERR_UNHANDLED, KEY_ALIAS, KEY_CHANNEL, KEY_CHANNEL_ID, KEY_CREATE,
    KEY_FID, KEY_KEY, KEY_NAME, KEY_TYPE,
};
use crate::reactor::{Context, Handler};
use crate::transport::queue::deliver_all;
use crate::transport::{
    ByteStream, Connection, ConnectionStats, DeliveryNotice, Endpoint, FlushResult, Listener,
    PeerCredentials,
};

// ============================================================================
// Statistics
// ============================================================================

/// Snapshot of one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSummary {
    pub id: ConnectionId,
    pub peer: String,
    pub name: String,
    pub credentials: Option<PeerCredentials>,
    pub queued: usize,
    pub stats: ConnectionStats,
}

/// Snapshot returned by [`Router::statistics`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouterStatistics {
    /// Connections accepted since start
    pub accepted: u64,
    /// Channels created since start (never removed)
    pub channels: usize,
    /// Connections currently open
    pub connections: Vec<ConnectionSummary>,
}

impl RouterStatistics {
    /// Sum of the per-connection counters.
    pub fn totals(&self) -> ConnectionStats {
        let mut total = ConnectionStats::default();
        for summary in &self.connections {
            let s = &summary.stats;
            total.messages_sent += s.messages_sent;
            total.messages_received += s.messages_received;
            total.bytes_sent += s.bytes_sent;
            total.bytes_received += s.bytes_received;
            total.messages_dropped += s.messages_dropped;
            total.bytes_dropped += s.bytes_dropped;
            total.partial_sends += s.partial_sends;
        }
        total
    }
}

// ============================================================================
// Router state
// ============================================================================

/// Messages produced while handling input, sent once handling is done.
type Outbox = Vec<(ConnectionId, Message)>;

/// Queue a subscriber-count event for every watcher of `channel`.
fn notify_watchers(channel: &Channel, kind: EventKind, outbox: &mut Outbox) {
    let event = protocol::to_message(&protocol::event(
        channel.id(),
        channel.subscriber_count(),
        kind,
    ));
    for watcher in channel.watchers() {
        outbox.push((watcher, event.clone()));
    }
}

struct RouterState {
    channels: ChannelRegistry,
    connections: BTreeMap<ConnectionId, Arc<RouterConnection>>,
    /// Bytes read since the last output phase
    received_bytes: usize,
}

impl RouterState {
    fn send(&self, to: ConnectionId, message: Message, notices: &mut Vec<DeliveryNotice>) -> bool {
        match self.connections.get(&to) {
            Some(connection) => connection.conn.lock().send(message, 0, None, notices),
            None => false,
        }
    }

    fn flush_all(&self, notices: &mut Vec<DeliveryNotice>) {
        for connection in self.connections.values() {
            let _ = connection.conn.lock().flush(notices);
        }
    }

    fn subscribe(&mut self, from: ConnectionId, id: ChannelId, outbox: &mut Outbox) -> bool {
        let Some(channel) = self.channels.get_mut(id) else {
            return false;
        };
        if !channel.subscribe(from) {
            return false;
        }
        log::debug!(
            "[router] connection {} subscribed to channel {} ({} total)",
            from,
            id,
            channel.subscriber_count()
        );
        notify_watchers(channel, EventKind::Subscribe, outbox);
        true
    }

    fn unsubscribe(&mut self, from: ConnectionId, id: ChannelId, outbox: &mut Outbox) -> bool {
        let Some(channel) = self.channels.get_mut(id) else {
            return false;
        };
        if !channel.unsubscribe(from) {
            return false;
        }
        log::debug!(
            "[router] connection {} unsubscribed from channel {} ({} total)",
            from,
            id,
            channel.subscriber_count()
        );
        notify_watchers(channel, EventKind::Unsubscribe, outbox);
        true
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Execute one control command.
    ///
    /// Events go to `outbox`; the response, if any, is returned and must be
    /// queued after them.
    fn handle_command(
        &mut self,
        from: ConnectionId,
        command: &Dictionary,
        outbox: &mut Outbox,
    ) -> Option<Dictionary> {
        if !command.contains(KEY_KEY) {
            log::debug!("[router] ignoring command without key from {}", from);
            return None;
        }
        let key = command.get_i32(KEY_KEY, -1);
        let code = CommandCode::of(command);
        log::trace!("[router] {} from connection {} (key {})", code, from, key);

        let response = match code {
            CommandCode::Lookup => self.lookup(from, key, command),
            CommandCode::Subscribe => match protocol::channel_of(command, KEY_CHANNEL) {
                Some(id) if self.channels.get(id).is_some() => {
                    if self.subscribe(from, id, outbox) {
                        protocol::ok_response(key)
                    } else {
                        protocol::error_response(key, ERR_ALREADY_SUBSCRIBED)
                    }
                }
                _ => protocol::error_response(key, ERR_NO_CHANNEL),
            },
            CommandCode::SubscribeAlias => {
                let alias = command.get_str(KEY_CHANNEL, "");
                match self.channels.find(alias) {
                    Some(id) => {
                        if self.subscribe(from, id, outbox) {
                            let mut response = protocol::ok_response(key);
                            response.set_str(KEY_ALIAS, alias);
                            response.set_i64(KEY_CHANNEL_ID, i64::from(id));
                            response
                        } else {
                            protocol::error_response(key, ERR_ALREADY_SUBSCRIBED)
                        }
                    }
                    None => protocol::error_response(key, ERR_NO_CHANNEL),
                }
            }
            CommandCode::Unsubscribe => match protocol::channel_of(command, KEY_CHANNEL) {
                Some(id) if self.channels.get(id).is_some() => {
                    if self.unsubscribe(from, id, outbox) {
                        protocol::ok_response(key)
                    } else {
                        protocol::error_response(key, ERR_NOT_SUBSCRIBED)
                    }
                }
                _ => protocol::error_response(key, ERR_NO_CHANNEL),
            },
            CommandCode::Watch => match protocol::channel_of(command, KEY_CHANNEL)
                .and_then(|id| self.channels.get_mut(id))
            {
                Some(channel) => {
                    if channel.watch(from) {
                        log::debug!(
                            "[router] connection {} watching channel {}",
                            from,
                            channel.id()
                        );
                        let summary = protocol::event(
                            channel.id(),
                            channel.subscriber_count(),
                            EventKind::Summary,
                        );
                        outbox.push((from, protocol::to_message(&summary)));
                        protocol::ok_response(key)
                    } else {
                        protocol::error_response(key, ERR_ALREADY_WATCHING)
                    }
                }
                None => protocol::error_response(key, ERR_NO_CHANNEL),
            },
            CommandCode::Unwatch => match protocol::channel_of(command, KEY_CHANNEL)
                .and_then(|id| self.channels.get_mut(id))
            {
                Some(channel) => {
                    if channel.unwatch(from) {
                        protocol::ok_response(key)
                    } else {
                        protocol::error_response(key, ERR_NOT_WATCHING)
                    }
                }
                None => protocol::error_response(key, ERR_NO_CHANNEL),
            },
            CommandCode::CreateChannelWithAlias | CommandCode::CreateChannel => {
                let alias = command.get_str(KEY_CHANNEL, "");
                if alias.is_empty() {
                    protocol::error_response(key, ERR_ILLEGAL_CHANNEL)
                } else {
                    self.channels
                        .create(alias, command.get_str(KEY_TYPE, ""), from);
                    protocol::ok_response(key)
                }
            }
            CommandCode::SetName => match self.connections.get(&from) {
                Some(connection) => {
                    let name = command.get_str(KEY_NAME, "");
                    log::debug!("[router] connection {} is now named {:?}", from, name);
                    connection.conn.lock().set_name(name);
                    protocol::ok_response(key)
                }
                None => protocol::error_response(key, ERR_NO_CLIENT),
            },
            CommandCode::GetName => {
                let fid = command.get_i64(KEY_FID, -1);
                let connection = u64::try_from(fid)
                    .ok()
                    .and_then(|fid| self.connections.get(&fid));
                match connection {
                    Some(connection) => {
                        let mut response = protocol::command(CommandCode::Result);
                        response.set_i64(KEY_FID, fid);
                        response.set_str(KEY_NAME, connection.conn.lock().name());
                        response.set_i32(KEY_KEY, key);
                        response
                    }
                    None => protocol::error_response(key, ERR_NO_CLIENT),
                }
            }
            _ => protocol::error_response(key, ERR_UNHANDLED),
        };

        if CommandCode::of(&response) == CommandCode::Error {
            log::debug!(
                "[router] {} from connection {} failed: {}",
                code,
                from,
                response.get_str(protocol::KEY_ERROR, "")
            );
        }
        Some(response)
    }

    fn lookup(&mut self, from: ConnectionId, key: i32, command: &Dictionary) -> Dictionary {
        let alias = command.get_str(KEY_ALIAS, "");
        let type_name = command.get_str(KEY_TYPE, "");
        let create = command.get_bool(KEY_CREATE, true);

        if alias.is_empty() {
            return protocol::error_response(key, ERR_ILLEGAL_CHANNEL);
        }
        let id = match self.channels.find(alias) {
            Some(id) => id,
            None if create => self.channels.create(alias, type_name, from),
            None => return protocol::error_response(key, ERR_NO_CHANNEL),
        };
        let Some(channel) = self.channels.get_mut(id) else {
            return protocol::error_response(key, ERR_NO_CHANNEL);
        };
        if !channel.match_type(type_name) {
            return protocol::error_response(key, ERR_TYPE_MISMATCH);
        }

        let mut response = protocol::command(CommandCode::Result);
        response.set_str(KEY_ALIAS, alias);
        response.set_str(KEY_TYPE, channel.type_name());
        response.set_i64(KEY_CHANNEL, i64::from(id));
        response.set_i32(KEY_KEY, key);
        response
    }

    // ========================================================================
    // Data
    // ========================================================================

    /// Fan `message` out to every connected subscriber of its channel.
    fn publish(&mut self, message: Message, outbox: &mut Outbox, notices: &mut Vec<DeliveryNotice>) {
        let id = message.channel();
        let Some(channel) = self.channels.get(id) else {
            log::debug!("[router] dropping message for unknown channel {}", id);
            return;
        };

        let mut gone = Vec::new();
        for subscriber in channel.subscribers() {
            match self.connections.get(&subscriber) {
                Some(connection) if connection.is_connected() => {
                    connection
                        .conn
                        .lock()
                        .send(message.clone(), 0, None, notices);
                }
                _ => gone.push(subscriber),
            }
        }
        for subscriber in gone {
            self.unsubscribe(subscriber, id, outbox);
        }
    }
}

// ============================================================================
// Router
// ============================================================================

/// Listening side of the broker.
pub struct Router {
    listener: Listener,
    endpoint: Endpoint,
    config: EchoConfig,
    state: Mutex<RouterState>,
    next_connection: AtomicU64,
    self_ref: Weak<Router>,
}

impl Router {
    /// Bind `address` (see [`Endpoint::resolve`]).
    ///
    /// Register the returned router with a reactor to start accepting.
    pub fn bind(address: &str, config: EchoConfig) -> io::Result<Arc<Self>> {
        config
            .validate()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let endpoint = Endpoint::resolve(address);
        let listener = endpoint.bind()?;
        log::info!("[router] listening on {}", endpoint);

        Ok(Arc::new_cyclic(|self_ref| Self {
            listener,
            endpoint,
            config,
            state: Mutex::new(RouterState {
                channels: ChannelRegistry::new(),
                connections: BTreeMap::new(),
                received_bytes: 0,
            }),
            next_connection: AtomicU64::new(1),
            self_ref: self_ref.clone(),
        }))
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn listener(&self) -> &Listener {
        &self.listener
    }

    pub fn config(&self) -> &EchoConfig {
        &self.config
    }

    pub fn connection_count(&self) -> usize {
        self.state.lock().connections.len()
    }

    pub fn channel_count(&self) -> usize {
        self.state.lock().channels.len()
    }

    /// Look up a channel by alias: `(id, type)`.
    pub fn channel(&self, alias: &str) -> Option<(ChannelId, String)> {
        let state = self.state.lock();
        let id = state.channels.find(alias)?;
        let channel = state.channels.get(id)?;
        Some((id, channel.type_name().to_string()))
    }

    /// Snapshot of connection and channel counters.
    pub fn statistics(&self) -> RouterStatistics {
        let state = self.state.lock();
        let connections = state
            .connections
            .values()
            .map(|connection| {
                let conn = connection.conn.lock();
                ConnectionSummary {
                    id: connection.id,
                    peer: conn.peer().to_string(),
                    name: conn.name().to_string(),
                    credentials: conn.credentials(),
                    queued: conn.queue_len(),
                    stats: conn.stats(),
                }
            })
            .collect();
        RouterStatistics {
            accepted: self.next_connection.load(Ordering::Relaxed) - 1,
            channels: state.channels.len(),
            connections,
        }
    }

    fn accept(&self, ctx: &mut Context) {
        loop {
            let stream = match self.listener.accept() {
                Ok(stream) => stream,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::warn!("[router] accept failed: {}", e);
                    break;
                }
            };

            if self.config.socket_buffer_size > 0 {
                if let Err(e) = stream.set_buffer_sizes(self.config.socket_buffer_size) {
                    log::debug!("[router] could not set socket buffer sizes: {}", e);
                }
            }

            let id = self.next_connection.fetch_add(1, Ordering::Relaxed);
            let fd = stream.as_raw_fd();
            let conn = Connection::new(stream, &self.config, self.config.router_queue_capacity);
            match conn.credentials() {
                Some(credentials) => log::info!(
                    "[router] connection {} accepted from {} ({})",
                    id,
                    conn.peer(),
                    credentials
                ),
                None => log::info!("[router] connection {} accepted from {}", id, conn.peer()),
            }

            let connection = Arc::new(RouterConnection {
                id,
                fd,
                router: self.self_ref.clone(),
                conn: Mutex::new(conn),
            });
            self.state
                .lock()
                .connections
                .insert(id, Arc::clone(&connection));
            ctx.add_handler(connection);
        }
    }

    /// Route messages read from connection `from`.
    fn dispatch(&self, from: ConnectionId, messages: Vec<Message>, bytes_read: usize) {
        let mut notices = Vec::new();
        {
            let mut state = self.state.lock();
            let mut outbox = Outbox::new();

            for message in messages {
                if message.channel() == CONTROL_CHANNEL {
                    match message.unpack::<Dictionary>() {
                        Ok(command) => {
                            if let Some(response) = state.handle_command(from, &command, &mut outbox)
                            {
                                outbox.push((from, protocol::to_message(&response)));
                            }
                        }
                        Err(e) => {
                            log::warn!("[router] malformed command from {}: {}", from, e);
                        }
                    }
                } else {
                    state.publish(message, &mut outbox, &mut notices);
                }

                for (to, message) in outbox.drain(..) {
                    state.send(to, message, &mut notices);
                }
            }

            state.received_bytes += bytes_read;
            if state.received_bytes >= self.config.flush_threshold {
                log::debug!(
                    "[router] {} bytes read since last flush, flushing early",
                    state.received_bytes
                );
                state.flush_all(&mut notices);
                state.received_bytes = 0;
            }
        }
        deliver_all(notices);
    }

    /// Forget a closed connection.
    fn remove_connection(&self, id: ConnectionId) -> Option<Arc<RouterConnection>> {
        let mut notices = Vec::new();
        let removed = {
            let mut state = self.state.lock();
            let removed = state.connections.remove(&id);
            let mut outbox = Outbox::new();
            for channel_id in state.channels.remove_connection(id) {
                if let Some(channel) = state.channels.get(channel_id) {
                    notify_watchers(channel, EventKind::Unsubscribe, &mut outbox);
                }
            }
            for (to, message) in outbox {
                state.send(to, message, &mut notices);
            }
            removed
        };
        deliver_all(notices);
        removed
    }
}

impl Handler for Router {
    fn raw_fd(&self) -> RawFd {
        self.listener.as_raw_fd()
    }

    fn handle_input(&self, ctx: &mut Context) -> bool {
        self.accept(ctx);
        true
    }

    fn handle_output(&self) -> FlushResult {
        self.state.lock().received_bytes = 0;
        FlushResult::Empty
    }

    fn disconnect(&self) {
        log::info!("[router] listener on {} closed", self.endpoint);
    }

    fn describe(&self) -> String {
        format!("router listener {}", self.endpoint)
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Router")
            .field("endpoint", &self.endpoint)
            .field("connections", &state.connections.len())
            .field("channels", &state.channels.len())
            .finish()
    }
}

// ============================================================================
// RouterConnection
// ============================================================================

/// One accepted peer of the router.
pub struct RouterConnection {
    id: ConnectionId,
    fd: RawFd,
    router: Weak<Router>,
    conn: Mutex<Connection>,
}

impl RouterConnection {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Handler for RouterConnection {
    fn raw_fd(&self) -> RawFd {
        self.fd
    }

    fn handle_input(&self, _ctx: &mut Context) -> bool {
        let (messages, bytes_read, connected) = {
            let mut conn = self.conn.lock();
            let before = conn.bytes_read();
            let messages = conn.recv_all();
            (
                messages,
                (conn.bytes_read() - before) as usize,
                conn.is_connected(),
            )
        };

        if let Some(router) = self.router.upgrade() {
            router.dispatch(self.id, messages, bytes_read);
        }
        connected
    }

    fn handle_output(&self) -> FlushResult {
        let mut notices = Vec::new();
        let result = self.conn.lock().flush(&mut notices);
        deliver_all(notices);
        result.unwrap_or(FlushResult::Empty)
    }

    fn is_connected(&self) -> bool {
        self.conn.lock().is_connected()
    }

    fn disconnect(&self) {
        if let Some(router) = self.router.upgrade() {
            router.remove_connection(self.id);
        }
        let notices = {
            let mut conn = self.conn.lock();
            let stats = conn.stats();
            log::info!(
                "[router] connection {} ({}) closed: {} msgs in, {} msgs out, {} dropped",
                self.id,
                conn.peer(),
                stats.messages_received,
                stats.messages_sent,
                stats.messages_dropped
            );
            conn.close()
        };
        deliver_all(notices);
    }

    fn describe(&self) -> String {
        format!("router connection {}", self.id)
    }
}

impl fmt::Debug for RouterConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouterConnection")
            .field("id", &self.id)
            .field("fd", &self.fd)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::FrameCodec;
    use std::io::{Read, Write};
    use std::os::unix::net::UnixStream;
    use std::time::{Duration, Instant};

    use crate::reactor::Reactor;

    fn command_state() -> RouterState {
        RouterState {
            channels: ChannelRegistry::new(),
            connections: BTreeMap::new(),
            received_bytes: 0,
        }
    }

    fn keyed(mut command: Dictionary, key: i32) -> Dictionary {
        command.set_i32(KEY_KEY, key);
        command
    }

    fn error_of(response: &Dictionary) -> &str {
        assert_eq!(CommandCode::of(response), CommandCode::Error, "{:?}", response);
        response.get_str(protocol::KEY_ERROR, "")
    }

    // ========================================================================
    // Command handling
    // ========================================================================

    #[test]
    fn test_command_without_key_ignored() {
        let mut state = command_state();
        let mut outbox = Outbox::new();
        let command = protocol::lookup_request("x", "", true);
        assert!(state.handle_command(1, &command, &mut outbox).is_none());
        assert!(state.channels.is_empty());
    }

    #[test]
    fn test_lookup_creates_and_resolves() {
        let mut state = command_state();
        let mut outbox = Outbox::new();

        let r = state
            .handle_command(1, &keyed(protocol::lookup_request("telemetry", "int", true), 4), &mut outbox)
            .unwrap();
        assert_eq!(CommandCode::of(&r), CommandCode::Result);
        assert_eq!(r.get_i32(KEY_CHANNEL, -1), 1);
        assert_eq!(r.get_i32(KEY_KEY, -1), 4);
        assert_eq!(r.get_str(KEY_TYPE, ""), "int");
        assert_eq!(r.get_str(KEY_ALIAS, ""), "telemetry");

        let r = state
            .handle_command(2, &keyed(protocol::lookup_request("telemetry", "", false), 5), &mut outbox)
            .unwrap();
        assert_eq!(r.get_i32(KEY_CHANNEL, -1), 1);
        assert_eq!(r.get_str(KEY_TYPE, ""), "int");
    }

    #[test]
    fn test_lookup_errors() {
        let mut state = command_state();
        let mut outbox = Outbox::new();

        let r = state
            .handle_command(1, &keyed(protocol::lookup_request("", "", true), 1), &mut outbox)
            .unwrap();
        assert_eq!(error_of(&r), ERR_ILLEGAL_CHANNEL);

        let r = state
            .handle_command(1, &keyed(protocol::lookup_request("nope", "", false), 2), &mut outbox)
            .unwrap();
        assert_eq!(error_of(&r), ERR_NO_CHANNEL);
        assert!(state.channels.is_empty());
    }

    #[test]
    fn test_lookup_type_mismatch_keeps_type() {
        let mut state = command_state();
        let mut outbox = Outbox::new();
        state.handle_command(1, &keyed(protocol::lookup_request("x", "foo", true), 1), &mut outbox);
        let r = state
            .handle_command(2, &keyed(protocol::lookup_request("x", "bar", true), 2), &mut outbox)
            .unwrap();
        assert_eq!(error_of(&r), ERR_TYPE_MISMATCH);
        assert_eq!(r.get_i32(KEY_KEY, -1), 2);
        assert_eq!(state.channels.get(1).unwrap().type_name(), "foo");
    }

    #[test]
    fn test_lookup_create_defaults_to_true() {
        let mut state = command_state();
        let mut outbox = Outbox::new();
        let mut command = protocol::command(CommandCode::Lookup);
        command.set_str(KEY_ALIAS, "implicit");
        let r = state.handle_command(1, &keyed(command, 1), &mut outbox).unwrap();
        assert_eq!(CommandCode::of(&r), CommandCode::Result);
        assert_eq!(state.channels.find("implicit"), Some(1));
    }

    #[test]
    fn test_subscribe_unsubscribe_errors() {
        let mut state = command_state();
        let mut outbox = Outbox::new();
        state.channels.create("x", "", 1);

        let sub = keyed(protocol::channel_request(CommandCode::Subscribe, 1), 1);
        let unsub = keyed(protocol::channel_request(CommandCode::Unsubscribe, 1), 2);
        let missing = keyed(protocol::channel_request(CommandCode::Subscribe, 9), 3);

        let r = state.handle_command(5, &sub, &mut outbox).unwrap();
        assert_eq!(CommandCode::of(&r), CommandCode::Ok);
        assert_eq!(error_of(&state.handle_command(5, &sub, &mut outbox).unwrap()), ERR_ALREADY_SUBSCRIBED);
        assert_eq!(error_of(&state.handle_command(5, &missing, &mut outbox).unwrap()), ERR_NO_CHANNEL);

        let r = state.handle_command(5, &unsub, &mut outbox).unwrap();
        assert_eq!(CommandCode::of(&r), CommandCode::Ok);
        assert_eq!(error_of(&state.handle_command(5, &unsub, &mut outbox).unwrap()), ERR_NOT_SUBSCRIBED);
        assert!(outbox.is_empty());
    }

    #[test]
    fn test_watch_events() {
        let mut state = command_state();
        let mut outbox = Outbox::new();
        state.channels.create("x", "", 1);

        let watch = keyed(protocol::channel_request(CommandCode::Watch, 1), 1);
        let r = state.handle_command(7, &watch, &mut outbox).unwrap();
        assert_eq!(CommandCode::of(&r), CommandCode::Ok);
        assert_eq!(outbox.len(), 1);
        let (to, summary) = outbox.remove(0);
        assert_eq!(to, 7);
        let summary: Dictionary = summary.unpack().unwrap();
        assert_eq!(summary.get_str(KEY_TYPE, ""), "summary");
        assert_eq!(summary.get_i32(protocol::KEY_SUBSCRIBERS, -1), 0);

        assert_eq!(error_of(&state.handle_command(7, &watch, &mut outbox).unwrap()), ERR_ALREADY_WATCHING);

        let sub = keyed(protocol::channel_request(CommandCode::Subscribe, 1), 2);
        state.handle_command(8, &sub, &mut outbox);
        let (to, event) = outbox.remove(0);
        assert_eq!(to, 7);
        let event: Dictionary = event.unpack().unwrap();
        assert_eq!(CommandCode::of(&event), CommandCode::Event);
        assert_eq!(event.get_str(KEY_TYPE, ""), "subscribe");
        assert_eq!(event.get_i32(protocol::KEY_SUBSCRIBERS, -1), 1);

        let unwatch = keyed(protocol::channel_request(CommandCode::Unwatch, 1), 3);
        assert_eq!(CommandCode::of(&state.handle_command(7, &unwatch, &mut outbox).unwrap()), CommandCode::Ok);
        assert_eq!(error_of(&state.handle_command(7, &unwatch, &mut outbox).unwrap()), ERR_NOT_WATCHING);
    }

    #[test]
    fn test_subscribe_alias_and_create() {
        let mut state = command_state();
        let mut outbox = Outbox::new();

        let mut sub = protocol::command(CommandCode::SubscribeAlias);
        sub.set_str(KEY_CHANNEL, "later");
        let sub = keyed(sub, 1);
        assert_eq!(error_of(&state.handle_command(3, &sub, &mut outbox).unwrap()), ERR_NO_CHANNEL);
        assert!(state.channels.find("later").is_none());

        let mut create = protocol::command(CommandCode::CreateChannelWithAlias);
        create.set_str(KEY_CHANNEL, "later");
        create.set_str(KEY_TYPE, "text");
        let create = keyed(create, 2);
        assert_eq!(CommandCode::of(&state.handle_command(3, &create, &mut outbox).unwrap()), CommandCode::Ok);
        assert_eq!(CommandCode::of(&state.handle_command(3, &create, &mut outbox).unwrap()), CommandCode::Ok);
        assert_eq!(state.channels.len(), 1);

        let r = state.handle_command(3, &sub, &mut outbox).unwrap();
        assert_eq!(CommandCode::of(&r), CommandCode::Ok);
        assert_eq!(r.get_str(KEY_ALIAS, ""), "later");
        assert_eq!(r.get_i32(KEY_CHANNEL_ID, -1), 1);
    }

    #[test]
    fn test_unknown_and_get_name_errors() {
        let mut state = command_state();
        let mut outbox = Outbox::new();

        let r = state
            .handle_command(1, &keyed(protocol::command(CommandCode::Result), 1), &mut outbox)
            .unwrap();
        assert_eq!(error_of(&r), ERR_UNHANDLED);

        let r = state
            .handle_command(1, &keyed(protocol::get_name_request(42), 2), &mut outbox)
            .unwrap();
        assert_eq!(error_of(&r), ERR_NO_CLIENT);
    }

    // ========================================================================
    // Live router
    // ========================================================================

    struct Peer {
        stream: UnixStream,
        codec: FrameCodec,
    }

    impl Peer {
        fn connect(router: &Router) -> Self {
            let path = router.listener().path().unwrap().to_path_buf();
            let stream = UnixStream::connect(path).unwrap();
            stream
                .set_read_timeout(Some(Duration::from_millis(1)))
                .unwrap();
            Self {
                stream,
                codec: FrameCodec::new(64 * 1024),
            }
        }

        fn send(&mut self, message: &Message) {
            self.stream.write_all(&FrameCodec::encode(message)).unwrap();
        }

        fn command(&mut self, command: Dictionary, key: i32) {
            self.send(&protocol::to_message(&keyed(command, key)));
        }

        fn poll(&mut self) -> Vec<Message> {
            let mut buf = [0u8; 4096];
            let mut out = Vec::new();
            loop {
                match self.stream.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => out.extend(self.codec.feed(&buf[..n]).unwrap()),
                    Err(_) => break,
                }
            }
            out
        }

        fn expect(&mut self, reactor: &mut Reactor, count: usize) -> Vec<Message> {
            let mut got = Vec::new();
            let start = Instant::now();
            while got.len() < count && start.elapsed() < Duration::from_secs(5) {
                reactor.wait(Some(Duration::from_millis(5))).unwrap();
                got.extend(self.poll());
            }
            assert_eq!(got.len(), count, "{:?}", got);
            got
        }
    }

    fn start() -> (tempfile::TempDir, Arc<Router>, Reactor) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("router.sock");
        let router = Router::bind(path.to_str().unwrap(), EchoConfig::default()).unwrap();
        let mut reactor = Reactor::new().unwrap();
        reactor.add_handler(router.clone()).unwrap();
        (dir, router, reactor)
    }

    fn pump(reactor: &mut Reactor, router: &Router, connections: usize) {
        let start = Instant::now();
        while router.connection_count() < connections && start.elapsed() < Duration::from_secs(5) {
            reactor.wait(Some(Duration::from_millis(5))).unwrap();
        }
        assert_eq!(router.connection_count(), connections);
    }

    #[test]
    fn test_publish_fan_out() {
        let (_dir, router, mut reactor) = start();
        let mut a = Peer::connect(&router);
        let mut b = Peer::connect(&router);
        pump(&mut reactor, &router, 2);

        a.command(protocol::lookup_request("telemetry", "", true), 0);
        let lookup: Dictionary = a.expect(&mut reactor, 1)[0].unpack().unwrap();
        let channel = lookup.get_i32(KEY_CHANNEL, -1) as u32;
        a.command(protocol::channel_request(CommandCode::Subscribe, channel), 1);
        a.expect(&mut reactor, 1);

        b.send(&Message::from_bytes(channel, vec![1, 2, 3, 4, 5]));
        let got = a.expect(&mut reactor, 1);
        assert_eq!(got[0].channel(), channel);
        assert_eq!(got[0].to_vec(), vec![1, 2, 3, 4, 5]);
        assert!(b.poll().is_empty());

        // Unknown channel is dropped silently.
        b.send(&Message::from_bytes(99, vec![0]));
        reactor.wait(Some(Duration::from_millis(20))).unwrap();
        assert!(a.poll().is_empty());
    }

    #[test]
    fn test_disconnect_cleans_up_and_notifies() {
        let (_dir, router, mut reactor) = start();
        let mut watcher = Peer::connect(&router);
        let mut subscriber = Peer::connect(&router);
        pump(&mut reactor, &router, 2);

        watcher.command(protocol::lookup_request("x", "", true), 0);
        watcher.expect(&mut reactor, 1);
        watcher.command(protocol::channel_request(CommandCode::Watch, 1), 1);
        watcher.expect(&mut reactor, 2);

        subscriber.command(protocol::channel_request(CommandCode::Subscribe, 1), 0);
        subscriber.expect(&mut reactor, 1);
        watcher.expect(&mut reactor, 1);

        drop(subscriber);
        pump(&mut reactor, &router, 1);
        let event: Dictionary = watcher.expect(&mut reactor, 1)[0].unpack().unwrap();
        assert_eq!(event.get_str(KEY_TYPE, ""), "unsubscribe");
        assert_eq!(event.get_i32(protocol::KEY_SUBSCRIBERS, -1), 0);
        assert_eq!(router.channel_count(), 1);
    }

    #[test]
    fn test_names_and_statistics() {
        let (_dir, router, mut reactor) = start();
        let mut a = Peer::connect(&router);
        pump(&mut reactor, &router, 1);

        a.command(protocol::set_name_request("sensor"), 0);
        a.expect(&mut reactor, 1);

        let fid = router.statistics().connections[0].id;
        a.command(protocol::get_name_request(fid), 1);
        let r: Dictionary = a.expect(&mut reactor, 1)[0].unpack().unwrap();
        assert_eq!(CommandCode::of(&r), CommandCode::Result);
        assert_eq!(r.get_str(KEY_NAME, ""), "sensor");

        let stats = router.statistics();
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.connections[0].name, "sensor");
        assert_eq!(stats.totals().messages_received, 2);
        assert_eq!(stats.totals().messages_sent, 2);
    }

    #[test]
    fn test_framing_error_disconnects() {
        let (_dir, router, mut reactor) = start();
        let mut a = Peer::connect(&router);
        pump(&mut reactor, &router, 1);

        a.stream.write_all(&[0x00, 1, 2, 3]).unwrap();
        pump(&mut reactor, &router, 0);
    }
}

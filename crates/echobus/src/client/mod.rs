// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Client session.
//!
//! A [`Client`] is one connection to a router, registered as a handler of a
//! [`Reactor`]. It correlates control commands with their responses and
//! dispatches data and watch events to local callbacks.
//!
//! # Architecture
//!
//! ```text
//! +-------------------------------------------------------------+
//! |                          Client                             |
//! |  +------------------+  +---------------------------------+  |
//! |  | Connection       |  | ClientState                     |  |
//! |  | (queue + codec)  |  |  requests:      key -> handler  |  |
//! |  +------------------+  |  subscriptions: channel -> [cb] |  |
//! |                        |  watches:       channel -> [cb] |  |
//! |                        |  aliases:       alias -> id     |  |
//! |                        +---------------------------------+  |
//! +-------------------------------------------------------------+
//! ```
//!
//! All callbacks run on the thread calling [`Reactor::wait`], never while
//! a client lock is held, so they may call back into the client.
//!
//! # Example
//!
//! ```no_run
//! use echobus::client::Client;
//! use echobus::message::Message;
//! use echobus::reactor::Reactor;
//!
//! let mut reactor = Reactor::new().unwrap();
//! let client = Client::connect(&mut reactor, "/tmp/echo.sock", "example").unwrap();
//! let _subscriber = client.subscribe("telemetry", "", |message: &Message| {
//!     println!("{} bytes", message.len());
//! });
//! client.publish("telemetry", "", Message::from_bytes(0, vec![1, 2, 3]), 0);
//! reactor.wait(None).unwrap();
//! ```
//!
//! [`Reactor`]: crate::reactor::Reactor
//! [`Reactor::wait`]: crate::reactor::Reactor::wait

pub mod publisher;
pub mod subscriber;
pub mod watcher;

use std::collections::HashMap;
use std::fmt;
use std::os::unix::io::RawFd;
use std::sync::Arc;

use mio::Waker;
use parking_lot::Mutex;

pub use publisher::Publisher;
pub use subscriber::Subscriber;
pub use watcher::{SubscriptionWatcher, Watcher};

use crate::chunk;
use crate::config::EchoConfig;
use crate::error::{CommandError, Error, Result};
use crate::message::{ChannelId, Dictionary, Message, CONTROL_CHANNEL};
use crate::protocol::{self, CommandCode, EventKind};
use crate::reactor::{Context, Handler, Reactor};
use crate::transport::queue::deliver_all;
use crate::transport::{
    ByteStream, Connection, ConnectionStats, DeliveryNotice, Endpoint, FlushResult,
    MessageCallback,
};

/// Environment variable holding alias remappings (`from=to;from2=to2`).
pub const ALIAS_MAP_ENV: &str = "ECHOLIB_MAP";

/// Queue priority of control commands, above any data.
const COMMAND_PRIORITY: i32 = i32::MAX;

/// Callback receiving data messages of a channel.
pub type DataCallback = Arc<dyn Fn(&Message) + Send + Sync>;

/// Callback receiving watch events of a channel.
pub type EventCallback = Arc<dyn Fn(&WatchEvent) + Send + Sync>;

/// Continuation receiving the outcome of a control command.
pub type ResponseHandler = Box<dyn FnOnce(Result<Dictionary>) + Send>;

/// Handle of a callback registered with [`Client::subscribe_channel`] or
/// [`Client::watch_channel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackId(u64);

/// Resolved channel returned by a LOOKUP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: ChannelId,
    pub alias: String,
    pub type_name: String,
}

impl ChannelInfo {
    fn from_response(response: &Dictionary) -> Result<Self> {
        let id = protocol::channel_of(response, protocol::KEY_CHANNEL).ok_or_else(|| {
            Error::InvalidData("lookup response without channel id".to_string())
        })?;
        Ok(Self {
            id,
            alias: response.get_str(protocol::KEY_ALIAS, "").to_string(),
            type_name: response.get_str(protocol::KEY_TYPE, "").to_string(),
        })
    }
}

/// Subscriber-count change reported to watchers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchEvent {
    pub channel: ChannelId,
    pub subscribers: usize,
    pub kind: EventKind,
}

impl WatchEvent {
    /// Parse an EVENT command.
    pub fn from_command(command: &Dictionary) -> Option<Self> {
        Some(Self {
            channel: protocol::channel_of(command, protocol::KEY_CHANNEL)?,
            subscribers: usize::try_from(command.get_i64(protocol::KEY_SUBSCRIBERS, 0)).ok()?,
            kind: EventKind::parse(command.get(protocol::KEY_TYPE)?)?,
        })
    }
}

/// Parse an alias map of the form `from=to;from2=to2`.
///
/// Tokens without exactly one `=` or with an empty side are ignored.
pub fn parse_alias_map(text: &str) -> HashMap<String, String> {
    text.split(';')
        .filter_map(|token| {
            let mut parts = token.split('=');
            let from = parts.next()?.trim();
            let to = parts.next()?.trim();
            if parts.next().is_some() || from.is_empty() || to.is_empty() {
                return None;
            }
            Some((from.to_string(), to.to_string()))
        })
        .collect()
}

// ============================================================================
// Session state
// ============================================================================

struct PendingRequest {
    code: CommandCode,
    handler: ResponseHandler,
}

/// Alias resolution used by [`Client::publish`].
enum AliasState {
    /// LOOKUP in flight; messages wait here
    Resolving(Vec<(Message, i32)>),
    Resolved(ChannelId),
}

/// Progress of the LOOKUP-driven binding of a [`Subscriber`], [`Publisher`]
/// or [`Watcher`].
#[derive(Debug, Default)]
struct BindingState {
    /// Owner dropped; late lookup results are ignored
    closed: bool,
    channel: Option<ChannelId>,
    callback: Option<CallbackId>,
}

type Binding = Arc<Mutex<BindingState>>;

#[derive(Default)]
struct ClientState {
    next_key: i32,
    next_callback: u64,
    requests: HashMap<i32, PendingRequest>,
    subscriptions: HashMap<ChannelId, Vec<(CallbackId, DataCallback)>>,
    watches: HashMap<ChannelId, Vec<(CallbackId, EventCallback)>>,
    aliases: HashMap<String, AliasState>,
}

impl ClientState {
    fn callback_id(&mut self) -> CallbackId {
        self.next_callback += 1;
        CallbackId(self.next_callback)
    }
}

/// Work collected under the client locks and run after they are released.
#[derive(Default)]
struct Deferred {
    notices: Vec<DeliveryNotice>,
    responses: Vec<(ResponseHandler, Result<Dictionary>)>,
}

impl Deferred {
    fn run(self) {
        deliver_all(self.notices);
        for (handler, result) in self.responses {
            handler(result);
        }
    }
}

// ============================================================================
// Shared session
// ============================================================================

struct ClientInner {
    fd: RawFd,
    endpoint: Endpoint,
    name: String,
    config: EchoConfig,
    aliases: HashMap<String, String>,
    waker: Arc<Waker>,
    /// Locked after `state` when both are needed
    conn: Mutex<Connection>,
    state: Mutex<ClientState>,
}

impl ClientInner {
    fn wake(&self) {
        if let Err(e) = self.waker.wake() {
            log::debug!("[client] waker failed: {}", e);
        }
    }

    /// Send `command` with a fresh key, remembering `handler` for the response.
    fn command_locked(
        &self,
        state: &mut ClientState,
        mut command: Dictionary,
        handler: ResponseHandler,
        deferred: &mut Deferred,
    ) {
        let key = state.next_key;
        state.next_key = state.next_key.wrapping_add(1);
        command.set_i32(protocol::KEY_KEY, key);
        let code = CommandCode::of(&command);

        let sent = self.conn.lock().send(
            protocol::to_message(&command),
            COMMAND_PRIORITY,
            None,
            &mut deferred.notices,
        );
        if sent {
            state.requests.insert(key, PendingRequest { code, handler });
        } else {
            deferred.responses.push((handler, Err(Error::NotConnected)));
        }
    }

    fn command(&self, command: Dictionary, handler: ResponseHandler) {
        let mut deferred = Deferred::default();
        {
            let mut state = self.state.lock();
            self.command_locked(&mut state, command, handler, &mut deferred);
        }
        self.wake();
        deferred.run();
    }

    fn remap<'a>(&'a self, alias: &'a str) -> &'a str {
        self.aliases.get(alias).map_or(alias, String::as_str)
    }

    fn send_data(&self, message: Message, priority: i32, callback: Option<MessageCallback>) -> bool {
        let mut notices = Vec::new();
        let accepted = self
            .conn
            .lock()
            .send(message, priority, callback, &mut notices);
        self.wake();
        deliver_all(notices);
        accepted
    }

    /// Chunk `message` and queue every piece; only the last carries `callback`.
    fn send_chunked(
        &self,
        message: &Message,
        chunk_size: usize,
        priority: i32,
        callback: Option<MessageCallback>,
    ) -> bool {
        let chunk_size = chunk_size.clamp(1, self.config.max_chunk_size().max(1));
        let mut wire = chunk::encode(message, chunk_size, fastrand::i64(..));
        let Some(last) = wire.pop() else {
            return false;
        };

        let mut notices = Vec::new();
        let accepted = {
            let mut conn = self.conn.lock();
            let mut accepted = true;
            for piece in wire {
                accepted &= conn.send(piece, priority, None, &mut notices);
            }
            conn.send(last, priority, callback, &mut notices) && accepted
        };
        self.wake();
        deliver_all(notices);
        accepted
    }

    fn handle_control(&self, message: &Message, deferred: &mut Deferred) {
        let command: Dictionary = match message.unpack() {
            Ok(command) => command,
            Err(e) => {
                log::warn!("[client] malformed control message: {}", e);
                return;
            }
        };

        let code = CommandCode::of(&command);
        if code == CommandCode::Event {
            let Some(event) = WatchEvent::from_command(&command) else {
                log::debug!("[client] ignoring malformed event {:?}", command);
                return;
            };
            let callbacks: Vec<EventCallback> = self
                .state
                .lock()
                .watches
                .get(&event.channel)
                .map(|list| list.iter().map(|(_, cb)| Arc::clone(cb)).collect())
                .unwrap_or_default();
            for callback in callbacks {
                callback(&event);
            }
            return;
        }

        if !code.is_response() {
            log::debug!("[client] ignoring unexpected command {}", code);
            return;
        }
        let key = command.get_i32(protocol::KEY_KEY, -1);
        let Some(request) = self.state.lock().requests.remove(&key) else {
            log::debug!("[client] response for unknown key {}", key);
            return;
        };

        let result = if code == CommandCode::Error {
            let reason = command.get_str(protocol::KEY_ERROR, "");
            log::debug!("[client] {} failed: {}", request.code, reason);
            Err(Error::Command(CommandError::new(
                request.code.as_i32(),
                reason,
            )))
        } else {
            Ok(command)
        };
        deferred.responses.push((request.handler, result));
    }

    fn handle_data(&self, message: &Message) {
        let callbacks: Vec<DataCallback> = self
            .state
            .lock()
            .subscriptions
            .get(&message.channel())
            .map(|list| list.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default();
        for callback in callbacks {
            callback(message);
        }
    }
}

impl Handler for ClientInner {
    fn raw_fd(&self) -> RawFd {
        self.fd
    }

    fn handle_input(&self, _ctx: &mut Context) -> bool {
        let (messages, connected) = {
            let mut conn = self.conn.lock();
            let messages = conn.recv_all();
            (messages, conn.is_connected())
        };

        for message in messages {
            if message.channel() == CONTROL_CHANNEL {
                let mut deferred = Deferred::default();
                self.handle_control(&message, &mut deferred);
                deferred.run();
            } else {
                self.handle_data(&message);
            }
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
        let mut deferred = Deferred::default();
        {
            let mut state = self.state.lock();
            deferred.notices = self.conn.lock().close();
            for (_, request) in state.requests.drain() {
                deferred
                    .responses
                    .push((request.handler, Err(Error::NotConnected)));
            }
            state.aliases.clear();
        }
        log::info!("[client] {} disconnected from {}", self.name, self.endpoint);
        deferred.run();
    }

    fn describe(&self) -> String {
        format!("client {:?} -> {}", self.name, self.endpoint)
    }
}

// ============================================================================
// Client
// ============================================================================

/// Cloneable handle to a router session.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Connect with default settings.
    ///
    /// An empty `address` resolves through `ECHOLIB_SOCKET`. A non-empty
    /// `name` is announced to the router with SET_NAME.
    pub fn connect(reactor: &mut Reactor, address: &str, name: &str) -> Result<Self> {
        Self::connect_with(reactor, address, name, EchoConfig::default())
    }

    /// Connect with explicit settings.
    pub fn connect_with(
        reactor: &mut Reactor,
        address: &str,
        name: &str,
        config: EchoConfig,
    ) -> Result<Self> {
        config.validate().map_err(|e| Error::Config(e.to_string()))?;
        let endpoint = Endpoint::resolve(address);
        let stream = endpoint.connect()?;
        let fd = stream.as_raw_fd();
        let conn = Connection::new(stream, &config, config.queue_capacity);

        let aliases = std::env::var(ALIAS_MAP_ENV)
            .map(|text| parse_alias_map(&text))
            .unwrap_or_default();
        if !aliases.is_empty() {
            log::debug!("[client] alias map: {:?}", aliases);
        }

        let inner = Arc::new(ClientInner {
            fd,
            endpoint,
            name: name.to_string(),
            config,
            aliases,
            waker: reactor.waker(),
            conn: Mutex::new(conn),
            state: Mutex::new(ClientState::default()),
        });
        reactor.add_handler(Arc::clone(&inner) as Arc<dyn Handler>)?;
        log::info!("[client] {:?} connected to {}", name, inner.endpoint);

        let client = Self { inner };
        if !name.is_empty() {
            client.inner.command(
                protocol::set_name_request(name),
                Box::new(|result: Result<Dictionary>| {
                    if let Err(e) = result {
                        log::warn!("[client] SET_NAME failed: {}", e);
                    }
                }),
            );
        }
        Ok(client)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    pub fn config(&self) -> &EchoConfig {
        &self.inner.config
    }

    pub fn is_connected(&self) -> bool {
        self.inner.conn.lock().is_connected()
    }

    pub fn stats(&self) -> ConnectionStats {
        self.inner.conn.lock().stats()
    }

    /// Messages waiting in the outgoing queue.
    pub fn queue_len(&self) -> usize {
        self.inner.conn.lock().queue_len()
    }

    /// Close the session. The reactor drops it on its next iteration.
    pub fn disconnect(&self) {
        let notices = self.inner.conn.lock().close();
        self.inner.wake();
        deliver_all(notices);
    }

    // ========================================================================
    // Low-level API
    // ========================================================================

    /// Resolve `alias` (after `ECHOLIB_MAP` remapping) to a channel.
    pub fn lookup_channel<F>(&self, alias: &str, type_name: &str, create: bool, callback: F)
    where
        F: FnOnce(Result<ChannelInfo>) + Send + 'static,
    {
        let alias = self.inner.remap(alias);
        self.inner.command(
            protocol::lookup_request(alias, type_name, create),
            Box::new(move |result: Result<Dictionary>| {
                callback(result.and_then(|response| ChannelInfo::from_response(&response)))
            }),
        );
    }

    /// Send an arbitrary control command; `key` is assigned here.
    pub fn send_command<F>(&self, command: Dictionary, handler: F)
    where
        F: FnOnce(Result<Dictionary>) + Send + 'static,
    {
        self.inner.command(command, Box::new(handler));
    }

    /// Ask the router for the name of connection `fid`.
    pub fn get_name<F>(&self, fid: u64, callback: F)
    where
        F: FnOnce(Result<String>) + Send + 'static,
    {
        self.send_command(protocol::get_name_request(fid), move |result| {
            callback(result.map(|r| r.get_str(protocol::KEY_NAME, "").to_string()))
        });
    }

    /// Register a raw data callback on `channel`.
    ///
    /// Only the first local callback of a channel sends SUBSCRIBE.
    pub fn subscribe_channel(&self, channel: ChannelId, callback: DataCallback) -> CallbackId {
        let mut deferred = Deferred::default();
        let id = {
            let mut state = self.inner.state.lock();
            let id = state.callback_id();
            let list = state.subscriptions.entry(channel).or_default();
            list.push((id, callback));
            if list.len() == 1 {
                self.inner.command_locked(
                    &mut state,
                    protocol::channel_request(CommandCode::Subscribe, channel),
                    log_failure("SUBSCRIBE", channel),
                    &mut deferred,
                );
            }
            id
        };
        self.inner.wake();
        deferred.run();
        id
    }

    /// Remove a data callback. The last one sends UNSUBSCRIBE.
    pub fn unsubscribe_channel(&self, channel: ChannelId, id: CallbackId) -> bool {
        let mut deferred = Deferred::default();
        let removed = {
            let mut state = self.inner.state.lock();
            let (removed, now_empty) = match state.subscriptions.get_mut(&channel) {
                Some(list) => {
                    let before = list.len();
                    list.retain(|(existing, _)| *existing != id);
                    (list.len() != before, list.is_empty())
                }
                None => (false, false),
            };
            if removed && now_empty {
                state.subscriptions.remove(&channel);
                self.inner.command_locked(
                    &mut state,
                    protocol::channel_request(CommandCode::Unsubscribe, channel),
                    log_failure("UNSUBSCRIBE", channel),
                    &mut deferred,
                );
            }
            removed
        };
        self.inner.wake();
        deferred.run();
        removed
    }

    /// Register a watch callback on `channel`.
    ///
    /// Only the first local callback of a channel sends WATCH.
    pub fn watch_channel(&self, channel: ChannelId, callback: EventCallback) -> CallbackId {
        let mut deferred = Deferred::default();
        let id = {
            let mut state = self.inner.state.lock();
            let id = state.callback_id();
            let list = state.watches.entry(channel).or_default();
            list.push((id, callback));
            if list.len() == 1 {
                self.inner.command_locked(
                    &mut state,
                    protocol::channel_request(CommandCode::Watch, channel),
                    log_failure("WATCH", channel),
                    &mut deferred,
                );
            }
            id
        };
        self.inner.wake();
        deferred.run();
        id
    }

    /// Remove a watch callback. The last one sends UNWATCH.
    pub fn unwatch_channel(&self, channel: ChannelId, id: CallbackId) -> bool {
        let mut deferred = Deferred::default();
        let removed = {
            let mut state = self.inner.state.lock();
            let (removed, now_empty) = match state.watches.get_mut(&channel) {
                Some(list) => {
                    let before = list.len();
                    list.retain(|(existing, _)| *existing != id);
                    (list.len() != before, list.is_empty())
                }
                None => (false, false),
            };
            if removed && now_empty {
                state.watches.remove(&channel);
                self.inner.command_locked(
                    &mut state,
                    protocol::channel_request(CommandCode::Unwatch, channel),
                    log_failure("UNWATCH", channel),
                    &mut deferred,
                );
            }
            removed
        };
        self.inner.wake();
        deferred.run();
        removed
    }

    /// Queue a raw message as is.
    ///
    /// Messages larger than `max_message_size` are refused and reported as
    /// `Dropped(TooLarge)`.
    pub fn send(&self, message: Message, priority: i32, callback: Option<MessageCallback>) -> bool {
        self.inner.send_data(message, priority, callback)
    }

    /// Queue `message` on `channel`, chunking it if it exceeds the chunk size.
    ///
    /// Only the final chunk reports to `callback`.
    pub fn send_chunked(
        &self,
        channel: ChannelId,
        message: &Message,
        priority: i32,
        callback: Option<MessageCallback>,
    ) -> bool {
        self.inner.send_chunked(
            &message.with_channel(channel),
            self.inner.config.chunk_size,
            priority,
            callback,
        )
    }

    // ========================================================================
    // High-level API
    // ========================================================================

    /// Publish `payload` on `alias`.
    ///
    /// The first publish on an alias resolves it (creating the channel);
    /// payloads published meanwhile are sent once the lookup completes.
    /// Returns `false` if the payload was not queued.
    pub fn publish(&self, alias: &str, type_name: &str, payload: Message, priority: i32) -> bool {
        let alias = self.inner.remap(alias).to_string();
        let resolved = {
            let mut state = self.inner.state.lock();
            let entry = state
                .aliases
                .entry(alias.clone())
                .or_insert_with(|| AliasState::Resolving(Vec::new()));
            match entry {
                AliasState::Resolved(id) => Some(*id),
                AliasState::Resolving(waiting) => {
                    let lookup_sent = !waiting.is_empty();
                    waiting.push((payload.clone(), priority));
                    if lookup_sent {
                        return true;
                    }
                    None
                }
            }
        };

        if let Some(id) = resolved {
            return self.send_chunked(id, &payload, priority, None);
        }
        if !self.is_connected() {
            self.inner.state.lock().aliases.remove(&alias);
            return false;
        }

        let client = self.clone();
        let key = alias.clone();
        self.inner.command(
            protocol::lookup_request(&alias, type_name, true),
            Box::new(move |result: Result<Dictionary>| {
                let info = result.and_then(|response| ChannelInfo::from_response(&response));
                client.finish_publish_lookup(&key, info);
            }),
        );
        true
    }

    fn finish_publish_lookup(&self, alias: &str, info: Result<ChannelInfo>) {
        let mut state = self.inner.state.lock();
        let waiting = match state.aliases.remove(alias) {
            Some(AliasState::Resolving(waiting)) => waiting,
            _ => Vec::new(),
        };

        match info {
            Ok(info) => {
                state
                    .aliases
                    .insert(alias.to_string(), AliasState::Resolved(info.id));
                // Still under the state lock: later publishes queue behind these.
                for (payload, priority) in waiting {
                    self.inner.send_chunked(
                        &payload.with_channel(info.id),
                        self.inner.config.chunk_size,
                        priority,
                        None,
                    );
                }
            }
            Err(e) => log::warn!(
                "[client] publish to {:?} failed, dropping {} messages: {}",
                alias,
                waiting.len(),
                e
            ),
        }
    }

    /// Subscribe to `alias`; `on_message` receives reassembled payloads.
    pub fn subscribe<F>(&self, alias: &str, type_name: &str, on_message: F) -> Subscriber
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        Subscriber::new(self, alias, type_name, on_message)
    }

    /// Create a publisher bound to `alias`.
    pub fn publisher(&self, alias: &str, type_name: &str) -> Publisher {
        Publisher::new(self, alias, type_name)
    }

    /// Watch `alias` for subscriber-count changes.
    pub fn watch<F>(&self, alias: &str, on_event: F) -> Watcher
    where
        F: Fn(&WatchEvent) + Send + Sync + 'static,
    {
        Watcher::new(self, alias, on_event)
    }
}

fn log_failure(what: &'static str, channel: ChannelId) -> ResponseHandler {
    Box::new(move |result: Result<Dictionary>| match result {
        Ok(_) => log::debug!("[client] {} channel {} confirmed", what, channel),
        Err(e) => log::warn!("[client] {} channel {} failed: {}", what, channel, e),
    })
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("name", &self.inner.name)
            .field("endpoint", &self.inner.endpoint)
            .field("connected", &self.is_connected())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::Router;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    fn setup() -> (tempfile::TempDir, String, Arc<Router>, Reactor) {
        let dir = tempfile::tempdir().unwrap();
        let address = dir.path().join("echo.sock").to_str().unwrap().to_string();
        let router = Router::bind(&address, EchoConfig::default()).unwrap();
        let mut reactor = Reactor::new().unwrap();
        reactor.add_handler(router.clone()).unwrap();
        (dir, address, router, reactor)
    }

    fn run_until(reactor: &mut Reactor, mut done: impl FnMut() -> bool) {
        let start = Instant::now();
        while !done() && start.elapsed() < Duration::from_secs(5) {
            reactor.wait(Some(Duration::from_millis(5))).unwrap();
        }
        assert!(done(), "condition not reached");
    }

    #[test]
    fn test_parse_alias_map() {
        let map = parse_alias_map("a=b; c = d ;bad;=x;y=;e=f=g;");
        assert_eq!(map.len(), 2);
        assert_eq!(map["a"], "b");
        assert_eq!(map["c"], "d");
        assert!(parse_alias_map("").is_empty());
    }

    #[test]
    fn test_watch_event_parsing() {
        let event = protocol::event(3, 2, EventKind::Unsubscribe);
        let parsed = WatchEvent::from_command(&event).unwrap();
        assert_eq!(parsed.channel, 3);
        assert_eq!(parsed.subscribers, 2);
        assert_eq!(parsed.kind, EventKind::Unsubscribe);

        let mut broken = event.clone();
        broken.set_str(protocol::KEY_TYPE, "other");
        assert!(WatchEvent::from_command(&broken).is_none());
    }

    #[test]
    fn test_lookup_and_keys() {
        let (_dir, address, router, mut reactor) = setup();
        let client = Client::connect(&mut reactor, &address, "").unwrap();

        let found = Arc::new(Mutex::new(Vec::new()));
        for alias in ["a", "b", "a"] {
            let found = found.clone();
            client.lookup_channel(alias, "", true, move |result| {
                found.lock().push(result.unwrap().id);
            });
        }
        run_until(&mut reactor, || found.lock().len() == 3);
        assert_eq!(*found.lock(), vec![1, 2, 1]);
        assert_eq!(router.channel_count(), 2);
    }

    #[test]
    fn test_lookup_error_reports_command() {
        let (_dir, address, _router, mut reactor) = setup();
        let client = Client::connect(&mut reactor, &address, "").unwrap();

        let error = Arc::new(Mutex::new(None));
        let slot = error.clone();
        client.lookup_channel("missing", "", false, move |result| {
            *slot.lock() = result.err();
        });
        run_until(&mut reactor, || error.lock().is_some());
        match error.lock().take() {
            Some(Error::Command(e)) => {
                assert_eq!(e.request, CommandCode::Lookup.as_i32());
                assert_eq!(e.message, protocol::ERR_NO_CHANNEL);
            }
            other => panic!("unexpected {:?}", other),
        };
    }

    #[test]
    fn test_local_subscribe_dedup() {
        let (_dir, address, router, mut reactor) = setup();
        let client = Client::connect(&mut reactor, &address, "").unwrap();
        let bound = Arc::new(AtomicUsize::new(0));
        {
            let bound = bound.clone();
            client.lookup_channel("x", "", true, move |r| {
                bound.store(r.unwrap().id as usize, Ordering::SeqCst);
            });
        }
        run_until(&mut reactor, || bound.load(Ordering::SeqCst) != 0);

        let first = client.subscribe_channel(1, Arc::new(|_: &Message| {}));
        let second = client.subscribe_channel(1, Arc::new(|_: &Message| {}));
        reactor.wait(Some(Duration::from_millis(20))).unwrap();
        let received = router.statistics().totals().messages_received;
        // LOOKUP + one SUBSCRIBE
        assert_eq!(received, 2);

        assert!(client.unsubscribe_channel(1, first));
        assert!(!client.unsubscribe_channel(1, first));
        reactor.wait(Some(Duration::from_millis(20))).unwrap();
        assert_eq!(router.statistics().totals().messages_received, 2);

        assert!(client.unsubscribe_channel(1, second));
        run_until(&mut reactor, || {
            router.statistics().totals().messages_received == 3
        });
    }

    #[test]
    fn test_disconnect_fails_pending_requests() {
        let (_dir, address, _router, mut reactor) = setup();
        let client = Client::connect(&mut reactor, &address, "").unwrap();
        let outcome = Arc::new(Mutex::new(None));
        let slot = outcome.clone();
        client.lookup_channel("x", "", true, move |r| *slot.lock() = Some(r.is_ok()));
        client.disconnect();
        run_until(&mut reactor, || outcome.lock().is_some());
        assert_eq!(*outcome.lock(), Some(false));
        assert!(!client.is_connected());
    }

    #[test]
    fn test_publish_before_lookup_completes() {
        let (_dir, address, _router, mut reactor) = setup();
        let publisher = Client::connect(&mut reactor, &address, "pub").unwrap();
        let subscriber = Client::connect(&mut reactor, &address, "sub").unwrap();

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let handle = subscriber.subscribe("numbers", "", move |m: &Message| {
            sink.lock().push(m.to_vec());
        });
        run_until(&mut reactor, || handle.is_bound());

        assert!(publisher.publish("numbers", "", Message::from_bytes(0, vec![1]), 0));
        assert!(publisher.publish("numbers", "", Message::from_bytes(0, vec![2]), 0));
        run_until(&mut reactor, || received.lock().len() == 2);
        assert!(publisher.publish("numbers", "", Message::from_bytes(0, vec![3]), 0));
        run_until(&mut reactor, || received.lock().len() == 3);
        assert_eq!(*received.lock(), vec![vec![1], vec![2], vec![3]]);
    }
}

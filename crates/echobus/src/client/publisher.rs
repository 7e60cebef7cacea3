// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Channel publisher.
//!
//! Payloads larger than the chunk size are split (see [`crate::chunk`]); the
//! delivery callback fires once per payload, when its last chunk is written
//! or dropped.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{Binding, BindingState, Client};
use crate::message::{ChannelId, Message};
use crate::transport::{Delivery, MessageCallback};

/// Sends payloads to an alias.
pub struct Publisher {
    client: Client,
    alias: String,
    binding: Binding,
    in_flight: Arc<AtomicUsize>,
    /// 0 = unlimited
    max_in_flight: usize,
    chunk_size: usize,
}

impl Publisher {
    /// Bind to `alias`, creating the channel with `type_name` if needed.
    pub fn new(client: &Client, alias: &str, type_name: &str) -> Self {
        let binding: Binding = Arc::new(Mutex::new(BindingState::default()));

        let pending = Arc::clone(&binding);
        let name = alias.to_string();
        client.lookup_channel(alias, type_name, true, move |result| {
            let mut state = pending.lock();
            if state.closed {
                return;
            }
            match result {
                Ok(info) => {
                    log::debug!("[client] publisher {:?} bound to channel {}", name, info.id);
                    state.channel = Some(info.id);
                }
                Err(e) => log::warn!("[client] publisher {:?} lookup failed: {}", name, e),
            }
        });

        Self {
            client: client.clone(),
            alias: alias.to_string(),
            binding,
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: 0,
            chunk_size: client.config().chunk_size,
        }
    }

    /// Refuse new payloads while `max` are queued and not yet written.
    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = max;
        self
    }

    /// Override the chunk size of this publisher.
    ///
    /// Clamped so that a chunk and its header fit in one frame
    /// (see [`EchoConfig::max_chunk_size`](crate::config::EchoConfig::max_chunk_size)).
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        let limit = self.client.config().max_chunk_size().max(1);
        if chunk_size > limit {
            log::warn!(
                "[client] publisher {:?}: chunk size {} exceeds frame limit, using {}",
                self.alias,
                chunk_size,
                limit
            );
        }
        self.chunk_size = chunk_size.clamp(1, limit);
        self
    }

    /// Effective chunk size.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn channel(&self) -> Option<ChannelId> {
        self.binding.lock().channel
    }

    pub fn is_bound(&self) -> bool {
        self.channel().is_some()
    }

    /// Payloads queued but not yet written or dropped.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Publish with default priority and no callback.
    pub fn publish(&self, message: Message) -> bool {
        self.publish_with(message, 0, None)
    }

    /// Publish `message`.
    ///
    /// Returns `false` if the publisher is unbound, over its in-flight cap,
    /// or the payload was rejected by the outgoing queue. `callback` then
    /// still fires when a queued piece is dropped.
    pub fn publish_with(
        &self,
        message: Message,
        priority: i32,
        callback: Option<MessageCallback>,
    ) -> bool {
        let Some(channel) = self.channel() else {
            return false;
        };
        if self.max_in_flight > 0 && self.in_flight.load(Ordering::SeqCst) >= self.max_in_flight
        {
            return false;
        }

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let in_flight = Arc::clone(&self.in_flight);
        let payload = message.clone();
        let tracker: MessageCallback = Box::new(move |_: &Message, delivery: Delivery| {
            in_flight.fetch_sub(1, Ordering::SeqCst);
            if let Some(callback) = callback {
                callback(&payload, delivery);
            }
        });

        self.client.inner.send_chunked(
            &message.with_channel(channel),
            self.chunk_size,
            priority,
            Some(tracker),
        )
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        self.binding.lock().closed = true;
    }
}

impl fmt::Debug for Publisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher")
            .field("alias", &self.alias)
            .field("channel", &self.channel())
            .field("in_flight", &self.in_flight())
            .field("max_in_flight", &self.max_in_flight)
            .field("chunk_size", &self.chunk_size)
            .finish()
    }
}

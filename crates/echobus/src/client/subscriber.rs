// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Channel subscriber with chunk reassembly.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{Binding, BindingState, Client, DataCallback};
use crate::chunk::{ChunkOutcome, Reassembler, ReassemblyStats};
use crate::message::{ChannelId, Message};

/// Receives whole payloads published on an alias.
///
/// The subscriber binds asynchronously: it is inert until the LOOKUP round
/// trip completes inside [`Reactor::wait`](crate::reactor::Reactor::wait).
/// Dropping it unsubscribes, or cancels a bind still in flight.
pub struct Subscriber {
    client: Client,
    alias: String,
    binding: Binding,
    reassembler: Arc<Mutex<Reassembler>>,
}

impl Subscriber {
    pub fn new<F>(client: &Client, alias: &str, type_name: &str, on_message: F) -> Self
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        let binding: Binding = Arc::new(Mutex::new(BindingState::default()));
        let reassembler = Arc::new(Mutex::new(Reassembler::new(
            client.config().pending_reassembly_capacity,
        )));

        let data: DataCallback = {
            let reassembler = Arc::clone(&reassembler);
            Arc::new(move |message: &Message| {
                let outcome = reassembler.lock().accept(message);
                if let ChunkOutcome::Complete(payload) = outcome {
                    on_message(&payload);
                }
            })
        };

        let session = client.clone();
        let pending = Arc::clone(&binding);
        let name = alias.to_string();
        client.lookup_channel(alias, type_name, true, move |result| {
            let mut state = pending.lock();
            if state.closed {
                return;
            }
            match result {
                Ok(info) => {
                    log::debug!("[client] subscriber {:?} bound to channel {}", name, info.id);
                    state.callback = Some(session.subscribe_channel(info.id, data));
                    state.channel = Some(info.id);
                }
                Err(e) => log::warn!("[client] subscriber {:?} lookup failed: {}", name, e),
            }
        });

        Self {
            client: client.clone(),
            alias: alias.to_string(),
            binding,
            reassembler,
        }
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Channel id once bound.
    pub fn channel(&self) -> Option<ChannelId> {
        self.binding.lock().channel
    }

    pub fn is_bound(&self) -> bool {
        self.channel().is_some()
    }

    /// Reassembly counters of this subscriber.
    pub fn stats(&self) -> ReassemblyStats {
        self.reassembler.lock().stats()
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        let (channel, callback) = {
            let mut state = self.binding.lock();
            state.closed = true;
            (state.channel.take(), state.callback.take())
        };
        if let (Some(channel), Some(callback)) = (channel, callback) {
            self.client.unsubscribe_channel(channel, callback);
        }
    }
}

impl fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("alias", &self.alias)
            .field("channel", &self.channel())
            .finish()
    }
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Channel watchers: subscriber-count events without channel data.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{Binding, BindingState, Client, EventCallback, WatchEvent};
use crate::message::ChannelId;

/// Receives the watch events of an alias.
///
/// Binds through LOOKUP (creating the channel) and unwatches on drop.
pub struct Watcher {
    client: Client,
    alias: String,
    binding: Binding,
}

impl Watcher {
    pub fn new<F>(client: &Client, alias: &str, on_event: F) -> Self
    where
        F: Fn(&WatchEvent) + Send + Sync + 'static,
    {
        let binding: Binding = Arc::new(Mutex::new(BindingState::default()));
        let callback: EventCallback = Arc::new(on_event);

        let session = client.clone();
        let pending = Arc::clone(&binding);
        let name = alias.to_string();
        client.lookup_channel(alias, "", true, move |result| {
            let mut state = pending.lock();
            if state.closed {
                return;
            }
            match result {
                Ok(info) => {
                    log::debug!("[client] watcher {:?} bound to channel {}", name, info.id);
                    state.callback = Some(session.watch_channel(info.id, callback));
                    state.channel = Some(info.id);
                }
                Err(e) => log::warn!("[client] watcher {:?} lookup failed: {}", name, e),
            }
        });

        Self {
            client: client.clone(),
            alias: alias.to_string(),
            binding,
        }
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
}

impl Drop for Watcher {
    fn drop(&mut self) {
        let (channel, callback) = {
            let mut state = self.binding.lock();
            state.closed = true;
            (state.channel.take(), state.callback.take())
        };
        if let (Some(channel), Some(callback)) = (channel, callback) {
            self.client.unwatch_channel(channel, callback);
        }
    }
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("alias", &self.alias)
            .field("channel", &self.channel())
            .finish()
    }
}

// ============================================================================
// SubscriptionWatcher
// ============================================================================

/// Tracks the current subscriber count of an alias.
///
/// Lets a producer skip expensive work while nobody listens.
pub struct SubscriptionWatcher {
    watcher: Watcher,
    subscribers: Arc<AtomicUsize>,
}

impl SubscriptionWatcher {
    pub fn new(client: &Client, alias: &str) -> Self {
        Self::build(client, alias, None)
    }

    /// Also report every count change to `on_change`.
    pub fn with_callback<F>(client: &Client, alias: &str, on_change: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        Self::build(client, alias, Some(Box::new(on_change)))
    }

    fn build(
        client: &Client,
        alias: &str,
        on_change: Option<Box<dyn Fn(usize) + Send + Sync>>,
    ) -> Self {
        let subscribers = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&subscribers);
        let watcher = Watcher::new(client, alias, move |event: &WatchEvent| {
            count.store(event.subscribers, Ordering::SeqCst);
            if let Some(on_change) = &on_change {
                on_change(event.subscribers);
            }
        });
        Self {
            watcher,
            subscribers,
        }
    }

    /// Latest known subscriber count (0 until the first event).
    pub fn subscribers(&self) -> usize {
        self.subscribers.load(Ordering::SeqCst)
    }

    pub fn channel(&self) -> Option<ChannelId> {
        self.watcher.channel()
    }

    pub fn is_bound(&self) -> bool {
        self.watcher.is_bound()
    }
}

impl fmt::Debug for SubscriptionWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionWatcher")
            .field("alias", &self.watcher.alias())
            .field("subscribers", &self.subscribers())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EchoConfig;
    use crate::message::Message;
    use crate::protocol::EventKind;
    use crate::reactor::Reactor;
    use crate::router::Router;
    use std::time::{Duration, Instant};

    fn setup() -> (tempfile::TempDir, String, Reactor) {
        let dir = tempfile::tempdir().unwrap();
        let address = dir.path().join("watch.sock").to_str().unwrap().to_string();
        let router = Router::bind(&address, EchoConfig::default()).unwrap();
        let mut reactor = Reactor::new().unwrap();
        reactor.add_handler(router).unwrap();
        (dir, address, reactor)
    }

    fn run_until(reactor: &mut Reactor, mut done: impl FnMut() -> bool) {
        let start = Instant::now();
        while !done() && start.elapsed() < Duration::from_secs(5) {
            reactor.wait(Some(Duration::from_millis(5))).unwrap();
        }
        assert!(done(), "condition not reached");
    }

    #[test]
    fn test_watcher_event_sequence() {
        let (_dir, address, mut reactor) = setup();
        let observer = Client::connect(&mut reactor, &address, "observer").unwrap();
        let worker = Client::connect(&mut reactor, &address, "worker").unwrap();

        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let watcher = Watcher::new(&observer, "jobs", move |e: &WatchEvent| {
            sink.lock().push((e.kind, e.subscribers));
        });
        run_until(&mut reactor, || events.lock().len() == 1);
        assert!(watcher.is_bound());

        let subscriber = worker.subscribe("jobs", "", |_: &Message| {});
        run_until(&mut reactor, || events.lock().len() == 2);
        drop(subscriber);
        run_until(&mut reactor, || events.lock().len() == 3);

        assert_eq!(
            *events.lock(),
            vec![
                (EventKind::Summary, 0),
                (EventKind::Subscribe, 1),
                (EventKind::Unsubscribe, 0),
            ]
        );
    }

    #[test]
    fn test_subscription_watcher_count() {
        let (_dir, address, mut reactor) = setup();
        let client = Client::connect(&mut reactor, &address, "").unwrap();

        let changes = Arc::new(Mutex::new(Vec::new()));
        let sink = changes.clone();
        let watcher = SubscriptionWatcher::with_callback(&client, "cam", move |n| {
            sink.lock().push(n);
        });
        run_until(&mut reactor, || watcher.is_bound() && !changes.lock().is_empty());
        assert_eq!(watcher.subscribers(), 0);

        let a = client.subscribe("cam", "", |_: &Message| {});
        run_until(&mut reactor, || watcher.subscribers() == 1);
        drop(a);
        run_until(&mut reactor, || changes.lock().len() == 3);
        assert_eq!(watcher.subscribers(), 0);
        assert_eq!(*changes.lock(), vec![0, 1, 0]);
    }
}

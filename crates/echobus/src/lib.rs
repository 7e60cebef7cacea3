// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # echobus - lightweight pub/sub message broker
//!
//! Processes exchange channel-tagged messages through a router over Unix
//! domain or TCP stream sockets. A reserved control channel carries
//! request/response commands that resolve aliases to channels and manage
//! subscriptions and watches.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use echobus::{Client, Message, Reactor};
//!
//! fn main() -> echobus::Result<()> {
//!     let mut reactor = Reactor::new()?;
//!     let client = Client::connect(&mut reactor, "", "quickstart")?;
//!
//!     let _subscriber = client.subscribe("telemetry", "", |message: &Message| {
//!         println!("received {} bytes", message.len());
//!     });
//!     client.publish("telemetry", "", Message::from_bytes(0, vec![1, 2, 3, 4, 5]), 0);
//!
//!     while reactor.wait(Some(std::time::Duration::from_millis(100)))? {}
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |                         Application Layer                           |
//! |   Client -> Publisher / Subscriber / Watcher / SubscriptionWatcher  |
//! +---------------------------------------------------------------------+
//! |                          Broker Layer                               |
//! |   Router | ChannelRegistry | Control protocol | Chunk reassembly    |
//! +---------------------------------------------------------------------+
//! |                        Transport Layer                              |
//! |   Reactor (mio) | Connection | FrameCodec | OutgoingQueue (heap)    |
//! +---------------------------------------------------------------------+
//! ```
//!
//! ## Key Types
//!
//! - [`Reactor`] - single-threaded readiness loop driving all handlers
//! - [`Router`] - broker accepting connections and routing channels
//! - [`Client`] - one session to a router
//! - [`Message`] - immutable channel-tagged byte span
//! - [`Dictionary`] - string map carried by control commands
//! - [`EchoConfig`] - queue, chunking and buffer tunables
//!
//! ## Environment
//!
//! - `ECHOLIB_SOCKET` - address used when an empty one is given
//! - `ECHOLIB_MAP` - alias remapping applied by clients (`from=to;...`)

pub mod chunk;
pub mod client;
pub mod config;
pub mod error;
pub mod message;
pub mod protocol;
pub mod reactor;
pub mod router;
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

pub use client::{
    CallbackId, ChannelInfo, Client, Publisher, Subscriber, SubscriptionWatcher, WatchEvent,
    Watcher,
};
pub use config::EchoConfig;
pub use error::{CommandError, Error, Result};
pub use message::{ChannelId, Dictionary, Message, CONTROL_CHANNEL};
pub use protocol::{CommandCode, EventKind};
pub use reactor::{Context, Handler, Reactor};
pub use router::Router;
pub use transport::{Delivery, DropReason, Endpoint, MessageCallback};

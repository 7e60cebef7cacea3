// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! End-to-end broker scenarios over a Unix socket.
//!
//! Each test runs a router and its clients on one reactor in the test thread.

#![allow(clippy::uninlined_format_args)] // Test code readability over pedantic
#![allow(clippy::cast_possible_truncation)] // Test parameters
#![allow(clippy::missing_panics_doc)] // Tests panic on failure
#![allow(clippy::too_many_lines)] // Scenario code

use echobus::protocol::{self, ERR_TYPE_MISMATCH};
use echobus::{
    ChannelInfo, Client, CommandCode, Delivery, DropReason, EchoConfig, Error, EventKind,
    Message, Reactor, Router, WatchEvent,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn setup(name: &str) -> (tempfile::TempDir, String, Arc<Router>, Reactor) {
    let dir = tempfile::tempdir().unwrap();
    let address = dir.path().join(name).to_str().unwrap().to_string();
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

fn lookup(reactor: &mut Reactor, client: &Client, alias: &str, type_name: &str) -> ChannelInfo {
    let slot = Arc::new(Mutex::new(None));
    let sink = slot.clone();
    client.lookup_channel(alias, type_name, true, move |result| {
        *sink.lock() = Some(result);
    });
    run_until(reactor, || slot.lock().is_some());
    let result = slot.lock().take().unwrap();
    result.unwrap()
}

#[test]
fn test_telemetry_publish_reaches_subscriber() {
    let (_dir, address, _router, mut reactor) = setup("telemetry.sock");
    let a = Client::connect(&mut reactor, &address, "a").unwrap();
    let b = Client::connect(&mut reactor, &address, "b").unwrap();

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let subscriber = a.subscribe("telemetry", "", move |m: &Message| {
        sink.lock().push((m.channel(), m.to_vec()));
    });
    run_until(&mut reactor, || subscriber.is_bound());

    assert!(b.publish("telemetry", "", Message::from_bytes(0, vec![1, 2, 3, 4, 5]), 0));
    run_until(&mut reactor, || !received.lock().is_empty());

    let channel = lookup(&mut reactor, &b, "telemetry", "").id;
    assert_eq!(subscriber.channel(), Some(channel));
    assert_eq!(*received.lock(), vec![(channel, vec![1, 2, 3, 4, 5])]);
}

#[test]
fn test_watch_reports_subscribe_and_unsubscribe() {
    let (_dir, address, _router, mut reactor) = setup("watch.sock");
    let a = Client::connect(&mut reactor, &address, "a").unwrap();
    let b = Client::connect(&mut reactor, &address, "b").unwrap();

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let watcher = a.watch("telemetry", move |e: &WatchEvent| {
        if e.kind != EventKind::Summary {
            sink.lock().push((e.kind, e.subscribers));
        }
    });

    let channel = lookup(&mut reactor, &b, "telemetry", "").id;
    run_until(&mut reactor, || watcher.is_bound());
    // WATCH must be registered before B subscribes
    reactor.wait(Some(Duration::from_millis(20))).unwrap();

    let id = b.subscribe_channel(channel, Arc::new(|_: &Message| {}));
    run_until(&mut reactor, || events.lock().len() == 1);
    assert!(b.unsubscribe_channel(channel, id));
    run_until(&mut reactor, || events.lock().len() == 2);

    assert_eq!(
        *events.lock(),
        vec![(EventKind::Subscribe, 1), (EventKind::Unsubscribe, 0)]
    );
}

#[test]
fn test_lookup_type_mismatch_keeps_type() {
    let (_dir, address, router, mut reactor) = setup("types.sock");
    let client = Client::connect(&mut reactor, &address, "").unwrap();

    let first = lookup(&mut reactor, &client, "x", "foo");
    assert_eq!(first.type_name, "foo");

    let slot = Arc::new(Mutex::new(None));
    let sink = slot.clone();
    client.lookup_channel("x", "bar", true, move |result| {
        *sink.lock() = Some(result);
    });
    run_until(&mut reactor, || slot.lock().is_some());
    match slot.lock().take().unwrap() {
        Err(Error::Command(e)) => {
            assert_eq!(e.request, CommandCode::Lookup.as_i32());
            assert_eq!(e.message, ERR_TYPE_MISMATCH);
        }
        other => panic!("expected type mismatch, got {:?}", other),
    }

    assert_eq!(router.channel("x"), Some((first.id, "foo".to_string())));
    assert_eq!(lookup(&mut reactor, &client, "x", "").type_name, "foo");
}

#[test]
fn test_large_payload_is_chunked_and_reassembled() {
    let (_dir, address, _router, mut reactor) = setup("large.sock");
    let a = Client::connect(&mut reactor, &address, "a").unwrap();
    let b = Client::connect(&mut reactor, &address, "b").unwrap();

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    let subscriber = a.subscribe("images", "", move |m: &Message| {
        sink.lock().push(m.to_vec());
    });
    run_until(&mut reactor, || subscriber.is_bound());

    let mut rng = fastrand::Rng::with_seed(7);
    let payload: Vec<u8> = (0..200_000).map(|_| rng.u8(..)).collect();
    let sent = Arc::new(Mutex::new(None));
    let outcome = sent.clone();
    let publisher = b.publisher("images", "");
    run_until(&mut reactor, || publisher.is_bound());
    assert!(publisher.publish_with(
        Message::from_bytes(0, payload.clone()),
        0,
        Some(Box::new(move |m: &Message, d: Delivery| {
            *outcome.lock() = Some((m.len(), d));
        })),
    ));

    run_until(&mut reactor, || !received.lock().is_empty());
    assert_eq!(received.lock()[0], payload);
    assert_eq!(*sent.lock(), Some((200_000, Delivery::Sent)));
    assert_eq!(subscriber.stats().completed, 1);
}

#[test]
fn test_get_name_of_connection() {
    let (_dir, address, _router, mut reactor) = setup("names.sock");
    let client = Client::connect(&mut reactor, &address, "camera").unwrap();

    let name = Arc::new(Mutex::new(None));
    let sink = name.clone();
    // connection ids start at 1
    client.get_name(1, move |result| *sink.lock() = Some(result.unwrap()));
    run_until(&mut reactor, || name.lock().is_some());
    assert_eq!(name.lock().as_deref(), Some("camera"));

    let error = Arc::new(Mutex::new(None));
    let sink = error.clone();
    client.send_command(protocol::command(CommandCode::GetName), move |result| {
        *sink.lock() = Some(result.is_err());
    });
    run_until(&mut reactor, || error.lock().is_some());
    assert_eq!(*error.lock(), Some(true));
}

#[test]
fn test_queue_overflow_equal_priority() {
    let mut queue = echobus::transport::OutgoingQueue::new(5000);
    let drops = Arc::new(Mutex::new(Vec::new()));

    for i in 0..6000u32 {
        let drops = drops.clone();
        let outcome = queue.push(
            Message::from_bytes(1, i.to_be_bytes().to_vec()),
            0,
            Some(Box::new(move |m: &Message, d: Delivery| {
                if d == Delivery::Dropped(DropReason::QueueOverflow) {
                    drops.lock().push(m.to_vec());
                }
            })),
        );
        if let Some(notice) = outcome.into_notice() {
            notice.deliver();
        }
    }

    assert_eq!(drops.lock().len(), 1000);
    assert_eq!(queue.len(), 5000);
    let order: Vec<u32> = std::iter::from_fn(|| queue.pop())
        .map(|entry| {
            let bytes = entry.message().to_vec();
            u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
        })
        .collect();
    assert_eq!(order, (0..5000).collect::<Vec<_>>());
}

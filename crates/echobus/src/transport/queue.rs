// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bounded, priority-ordered outgoing queue.
//!
//! Entries are ordered by `(priority desc, arrival asc)`. The queue is a
//! min-max heap so both ends are reachable in O(log n):
//!
//! - the **maximum** (highest priority, oldest) is the next entry to send;
//! - the **minimum** (lowest priority, newest) is the eviction candidate.
//!
//! When the queue is full a new entry replaces the minimum only if it ranks
//! strictly above it; otherwise the new entry is rejected. Producers are
//! never blocked. Every entry that leaves the queue yields exactly one
//! [`Delivery`] notification through its optional callback.
//!
//! Callbacks are not invoked by the queue itself. Operations hand back
//! [`DeliveryNotice`]s so the owner can run them after releasing its locks.

use std::cmp::Ordering;
use std::fmt;

use crate::message::Message;

/// Default capacity of a client-side outgoing queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 5000;

/// Why a queued message was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// Shed by the outgoing queue under overload.
    QueueOverflow,
    /// Still queued when the connection went away.
    Disconnected,
    /// Larger than the frame size limit; never queued.
    TooLarge,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::QueueOverflow => write!(f, "queue overflow"),
            DropReason::Disconnected => write!(f, "disconnected"),
            DropReason::TooLarge => write!(f, "too large"),
        }
    }
}

/// Final outcome of a queued message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Delivery {
    /// Fully written to the socket.
    Sent,
    /// Discarded before being written.
    Dropped(DropReason),
}

impl Delivery {
    /// Check if the message reached the socket.
    pub fn is_sent(&self) -> bool {
        matches!(self, Delivery::Sent)
    }
}

/// Completion callback attached to a queued message. Runs exactly once.
pub type MessageCallback = Box<dyn FnOnce(&Message, Delivery) + Send>;

// ============================================================================
// MinMaxHeap
// ============================================================================

/// Double-ended priority queue.
///
/// Even levels (the root is level 0) are min levels: a node there is not
/// greater than any of its descendants. Odd levels are max levels.
#[derive(Debug, Clone)]
pub struct MinMaxHeap<T> {
    items: Vec<T>,
}

impl<T> Default for MinMaxHeap<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

fn is_min_level(index: usize) -> bool {
    (usize::BITS - (index + 1).leading_zeros() - 1) % 2 == 0
}

fn parent(index: usize) -> usize {
    (index - 1) / 2
}

impl<T: Ord> MinMaxHeap<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Smallest item.
    pub fn peek_min(&self) -> Option<&T> {
        self.items.first()
    }

    /// Largest item.
    pub fn peek_max(&self) -> Option<&T> {
        self.max_index().map(|i| &self.items[i])
    }

    pub fn push(&mut self, item: T) {
        self.items.push(item);
        self.bubble_up(self.items.len() - 1);
    }

    /// Remove and return the smallest item.
    pub fn pop_min(&mut self) -> Option<T> {
        if self.items.is_empty() {
            return None;
        }
        let item = self.items.swap_remove(0);
        if !self.items.is_empty() {
            self.trickle_down(0);
        }
        Some(item)
    }

    /// Remove and return the largest item.
    pub fn pop_max(&mut self) -> Option<T> {
        let index = self.max_index()?;
        let item = self.items.swap_remove(index);
        if index < self.items.len() {
            self.trickle_down(index);
        }
        Some(item)
    }

    /// Remove every item in unspecified order.
    pub fn drain(&mut self) -> std::vec::Drain<'_, T> {
        self.items.drain(..)
    }

    fn max_index(&self) -> Option<usize> {
        match self.items.len() {
            0 => None,
            1 => Some(0),
            2 => Some(1),
            _ => Some(if self.items[1] >= self.items[2] { 1 } else { 2 }),
        }
    }

    fn bubble_up(&mut self, index: usize) {
        if index == 0 {
            return;
        }
        let p = parent(index);
        if is_min_level(index) {
            if self.items[index] > self.items[p] {
                self.items.swap(index, p);
                self.bubble_up_by(p, Ordering::Greater);
            } else {
                self.bubble_up_by(index, Ordering::Less);
            }
        } else if self.items[index] < self.items[p] {
            self.items.swap(index, p);
            self.bubble_up_by(p, Ordering::Less);
        } else {
            self.bubble_up_by(index, Ordering::Greater);
        }
    }

    /// Move `index` up through its grandparents while it compares `toward`
    /// (Less on min levels, Greater on max levels).
    fn bubble_up_by(&mut self, mut index: usize, toward: Ordering) {
        while index > 2 {
            let grandparent = parent(parent(index));
            if self.items[index].cmp(&self.items[grandparent]) != toward {
                break;
            }
            self.items.swap(index, grandparent);
            index = grandparent;
        }
    }

    fn trickle_down(&mut self, index: usize) {
        if is_min_level(index) {
            self.trickle_down_by(index, Ordering::Less);
        } else {
            self.trickle_down_by(index, Ordering::Greater);
        }
    }

    /// Extreme (by `toward`) index among children and grandchildren of `index`.
    fn extreme_descendant(&self, index: usize, toward: Ordering) -> Option<usize> {
        let len = self.items.len();
        let first_child = 2 * index + 1;
        let first_grandchild = 4 * index + 3;
        let candidates = (first_child..(first_child + 2).min(len))
            .chain(first_grandchild..(first_grandchild + 4).min(len));

        let mut best: Option<usize> = None;
        for candidate in candidates {
            best = match best {
                Some(b) if self.items[candidate].cmp(&self.items[b]) != toward => Some(b),
                _ => Some(candidate),
            };
        }
        best
    }

    fn trickle_down_by(&mut self, mut index: usize, toward: Ordering) {
        while let Some(m) = self.extreme_descendant(index, toward) {
            if self.items[m].cmp(&self.items[index]) != toward {
                return;
            }
            self.items.swap(m, index);
            if m <= 2 * index + 2 {
                // Direct child: its subtree is already ordered.
                return;
            }
            let p = parent(m);
            if self.items[m].cmp(&self.items[p]) == toward.reverse() {
                self.items.swap(m, p);
            }
            index = m;
        }
    }
}

// ============================================================================
// Queued entries
// ============================================================================

/// A message waiting in an [`OutgoingQueue`].
pub struct QueuedMessage {
    message: Message,
    priority: i32,
    sequence: u64,
    callback: Option<MessageCallback>,
}

impl QueuedMessage {
    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Arrival order inside the owning queue.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Finish this entry with `delivery`.
    ///
    /// Returns `None` when there is no callback to run.
    pub fn finish(self, delivery: Delivery) -> Option<DeliveryNotice> {
        let callback = self.callback?;
        Some(DeliveryNotice::new(self.message, delivery, callback))
    }
}

impl fmt::Debug for QueuedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedMessage")
            .field("channel", &self.message.channel())
            .field("len", &self.message.len())
            .field("priority", &self.priority)
            .field("sequence", &self.sequence)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

// Greater means "send first": higher priority, then older.
impl Ord for QueuedMessage {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl PartialOrd for QueuedMessage {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueuedMessage {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueuedMessage {}

/// A completion callback ready to run.
pub struct DeliveryNotice {
    message: Message,
    delivery: Delivery,
    callback: MessageCallback,
}

impl DeliveryNotice {
    pub(crate) fn new(message: Message, delivery: Delivery, callback: MessageCallback) -> Self {
        Self {
            message,
            delivery,
            callback,
        }
    }

    pub fn delivery(&self) -> Delivery {
        self.delivery
    }

    /// Run the callback.
    pub fn deliver(self) {
        (self.callback)(&self.message, self.delivery);
    }
}

impl fmt::Debug for DeliveryNotice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryNotice")
            .field("message", &self.message)
            .field("delivery", &self.delivery)
            .finish()
    }
}

/// Run every notice in order.
pub fn deliver_all(notices: impl IntoIterator<Item = DeliveryNotice>) {
    for notice in notices {
        notice.deliver();
    }
}

// ============================================================================
// OutgoingQueue
// ============================================================================

/// Result of [`OutgoingQueue::push`].
#[derive(Debug)]
pub enum PushOutcome {
    /// Inserted without displacing anything.
    Accepted,
    /// Inserted after evicting the lowest-ranked entry.
    Replaced(QueuedMessage),
    /// The queue was full and the new entry did not outrank its minimum.
    Rejected(QueuedMessage),
}

impl PushOutcome {
    /// Check if the pushed message is now queued.
    pub fn is_accepted(&self) -> bool {
        !matches!(self, PushOutcome::Rejected(_))
    }

    /// Notice for whichever entry was shed, if any.
    pub fn into_notice(self) -> Option<DeliveryNotice> {
        match self {
            PushOutcome::Accepted => None,
            PushOutcome::Replaced(entry) | PushOutcome::Rejected(entry) => {
                entry.finish(Delivery::Dropped(DropReason::QueueOverflow))
            }
        }
    }
}

/// Queue statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Entries accepted by `push`
    pub pushed: u64,
    /// Entries removed by `pop`
    pub popped: u64,
    /// Entries shed because the queue was full
    pub dropped: u64,
    /// Payload bytes shed because the queue was full
    pub dropped_bytes: u64,
    /// Highest number of entries seen at once
    pub high_watermark: usize,
}

/// Per-connection outgoing queue.
pub struct OutgoingQueue {
    heap: MinMaxHeap<QueuedMessage>,
    /// 0 means unbounded
    capacity: usize,
    next_sequence: u64,
    stats: QueueStats,
}

impl OutgoingQueue {
    /// Create a queue holding at most `capacity` entries (0 = unbounded).
    pub fn new(capacity: usize) -> Self {
        Self {
            heap: MinMaxHeap::with_capacity(capacity.min(1024)),
            capacity,
            next_sequence: 0,
            stats: QueueStats::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.capacity != 0 && self.heap.len() >= self.capacity
    }

    pub fn stats(&self) -> QueueStats {
        self.stats
    }

    /// Queue `message` with `priority` (higher is sent first).
    pub fn push(
        &mut self,
        message: Message,
        priority: i32,
        callback: Option<MessageCallback>,
    ) -> PushOutcome {
        let entry = QueuedMessage {
            message,
            priority,
            sequence: self.next_sequence,
            callback,
        };
        self.next_sequence += 1;

        if !self.is_full() {
            self.insert(entry);
            return PushOutcome::Accepted;
        }

        let outranks_min = self.heap.peek_min().is_some_and(|min| entry > *min);
        let shed = if outranks_min {
            match self.heap.pop_min() {
                Some(evicted) => {
                    self.insert(entry);
                    PushOutcome::Replaced(evicted)
                }
                None => PushOutcome::Rejected(entry),
            }
        } else {
            PushOutcome::Rejected(entry)
        };

        if let PushOutcome::Replaced(e) | PushOutcome::Rejected(e) = &shed {
            self.stats.dropped += 1;
            self.stats.dropped_bytes += e.message.len() as u64;
            log::debug!(
                "[queue] overflow: dropped message on channel {} (priority {}, {} bytes)",
                e.message.channel(),
                e.priority,
                e.message.len()
            );
        }
        shed
    }

    fn insert(&mut self, entry: QueuedMessage) {
        self.heap.push(entry);
        self.stats.pushed += 1;
        self.stats.high_watermark = self.stats.high_watermark.max(self.heap.len());
    }

    /// Next entry to send.
    pub fn peek(&self) -> Option<&QueuedMessage> {
        self.heap.peek_max()
    }

    /// Remove the next entry to send.
    pub fn pop(&mut self) -> Option<QueuedMessage> {
        let entry = self.heap.pop_max()?;
        self.stats.popped += 1;
        Some(entry)
    }

    /// Empty the queue, finishing every entry with `delivery`.
    pub fn drain_all(&mut self, delivery: Delivery) -> Vec<DeliveryNotice> {
        let mut entries: Vec<QueuedMessage> = self.heap.drain().collect();
        entries.sort_by(|a, b| b.cmp(a));
        entries
            .into_iter()
            .filter_map(|entry| entry.finish(delivery))
            .collect()
    }
}

impl Default for OutgoingQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl fmt::Debug for OutgoingQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutgoingQueue")
            .field("len", &self.heap.len())
            .field("capacity", &self.capacity)
            .field("stats", &self.stats)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

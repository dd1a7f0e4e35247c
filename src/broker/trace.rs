//! Trace ring — bounded, cursor-addressable log of broker events.
//!
//! Cursors are assigned from a monotonic counter and never reused;
//! the oldest events are evicted once the ring is full. A `watch`
//! channel carries the last-assigned cursor so catch-up readers can
//! block for new events the same way transfer waiters block on a
//! queue.

use std::collections::VecDeque;

use tokio::sync::watch;

use crate::ipc::protocol::{TraceEvent, TracedEvent};

pub const DEFAULT_TRACE_CAPACITY: usize = 1024;

#[derive(Debug)]
pub struct TraceRing {
    events: VecDeque<TracedEvent>,
    capacity: usize,
    next_cursor: u64,
    wake_tx: watch::Sender<u64>,
}

impl TraceRing {
    /// # Panics
    ///
    /// Panics if `capacity` is 0. The ring must hold at least one event.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity >= 1, "trace ring capacity must be >= 1");
        let (wake_tx, _) = watch::channel(0);
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
            next_cursor: 1,
            wake_tx,
        }
    }

    /// Record an event, assigning the next cursor and evicting the
    /// oldest event at capacity. Wakes all catch-up readers.
    pub fn append(&mut self, event: TraceEvent) -> u64 {
        let cursor = self.next_cursor;
        self.next_cursor += 1;
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(TracedEvent { cursor, event });
        self.wake_tx.send_replace(cursor);
        cursor
    }

    /// Events with cursor strictly after `from`, oldest first. `-1`
    /// selects everything still retained.
    pub fn get_after(&self, from: i64) -> Vec<TracedEvent> {
        self.events
            .iter()
            .filter(|traced| from < 0 || traced.cursor > from as u64)
            .cloned()
            .collect()
    }

    /// Subscribe to append wake-ups.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.wake_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::protocol::{MessageId, TraceItem};

    fn ack_event(queue: &str, index: u64) -> TraceEvent {
        TraceEvent {
            time: 0.0,
            input: Some("s".into()),
            output: None,
            queue: queue.into(),
            item: TraceItem::Ack {
                id: MessageId(queue.into(), index),
            },
            processing_ns: None,
        }
    }

    #[test]
    fn cursors_are_strictly_increasing() {
        let mut ring = TraceRing::new(8);
        let a = ring.append(ack_event("q", 1));
        let b = ring.append(ack_event("q", 2));
        assert_eq!(a, 1);
        assert_eq!(b, 2);
    }

    #[test]
    fn get_after_filters_by_cursor() {
        let mut ring = TraceRing::new(8);
        for i in 1..=3 {
            ring.append(ack_event("q", i));
        }
        assert_eq!(ring.get_after(-1).len(), 3);
        let tail = ring.get_after(2);
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].cursor, 3);
        assert!(ring.get_after(3).is_empty());
    }

    #[test]
    fn eviction_keeps_newest_and_cursors() {
        let mut ring = TraceRing::new(2);
        for i in 1..=5 {
            ring.append(ack_event("q", i));
        }
        let retained = ring.get_after(-1);
        let cursors: Vec<u64> = retained.iter().map(|t| t.cursor).collect();
        assert_eq!(cursors, vec![4, 5]);
        // Evicted cursors are not reassigned.
        assert_eq!(ring.append(ack_event("q", 6)), 6);
    }

    #[test]
    fn append_wakes_subscribers() {
        let mut ring = TraceRing::new(4);
        let mut rx = ring.subscribe();
        ring.append(ack_event("q", 1));
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), 1);
    }
}

//! Ordered per-queue message store with watch-based waiters.
//!
//! Each queue assigns strictly increasing 64-bit indices, never
//! reused within a broker run. Waiters subscribe to a `watch` channel
//! carrying the last-assigned index: every enqueue publishes through
//! it (waking all subscribers), and dropping the queue closes the
//! channel, which is the deletion signal.

use std::collections::VecDeque;

use tokio::sync::watch;

use crate::ipc::protocol::{Message, MessageId, Origin};

/// A queued message, immutable after insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub origin: Origin,
    pub enqueued_at_ns: u64,
    pub message: Message,
}

/// Does `index` lie strictly after `cursor`? A cursor of `-1` selects
/// everything.
pub fn index_after(index: u64, cursor: i64) -> bool {
    cursor < 0 || index > cursor as u64
}

#[derive(Debug)]
pub struct Queue {
    name: String,
    next_index: u64,
    contents: VecDeque<(u64, Entry)>,
    wake_tx: watch::Sender<u64>,
    /// Deadline of the most recent Transfer naming this queue.
    /// Diagnostic only; last-writer-wins, never cleared.
    next_transfer_expected_ns: Option<u64>,
}

impl Queue {
    pub fn new(name: String) -> Self {
        let (wake_tx, _) = watch::channel(0);
        Self {
            name,
            next_index: 1,
            contents: VecDeque::new(),
            wake_tx,
            next_transfer_expected_ns: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a message, assigning it the next index, and wake all
    /// current waiters. Never blocks.
    pub fn enqueue(&mut self, origin: Origin, message: Message, now_ns: u64) -> MessageId {
        let index = self.next_index;
        self.next_index += 1;
        self.contents.push_back((
            index,
            Entry {
                origin,
                enqueued_at_ns: now_ns,
                message,
            },
        ));
        self.wake_tx.send_replace(index);
        MessageId(self.name.clone(), index)
    }

    /// Pointwise removal; an absent index is silently ignored. Does
    /// not wake waiters.
    pub fn ack(&mut self, index: u64) {
        self.contents.retain(|(i, _)| *i != index);
    }

    pub fn find(&self, index: u64) -> Option<&Entry> {
        self.contents
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, entry)| entry)
    }

    /// Ordered snapshot of the queued entries.
    pub fn contents(&self) -> impl Iterator<Item = (u64, &Entry)> {
        self.contents.iter().map(|(i, entry)| (*i, entry))
    }

    /// Entries with index strictly after `cursor`, in queue order.
    pub fn peek_after(&self, cursor: i64) -> impl Iterator<Item = (u64, &Entry)> {
        self.contents()
            .filter(move |(index, _)| index_after(*index, cursor))
    }

    /// Subscribe to enqueue wake-ups. The receiver errors out once the
    /// queue has been dropped (deleted from the directory).
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.wake_tx.subscribe()
    }

    pub fn set_next_transfer_expected(&mut self, deadline_ns: u64) {
        self.next_transfer_expected_ns = Some(deadline_ns);
    }

    pub fn next_transfer_expected(&self) -> Option<u64> {
        self.next_transfer_expected_ns
    }
}

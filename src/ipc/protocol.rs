//! Wire protocol for the message switch.
//!
//! Requests and responses are MessagePack-encoded tagged maps with a
//! `type` field. A connection carries a strict alternation of one
//! request frame and one response frame.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Maximum payload size (16 MiB).
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// Identity of one enqueued message: (queue name, per-queue index).
///
/// Indices are monotonically increasing within a queue and never
/// reused within a broker run. Encodes as a 2-element array.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String, pub u64);

impl MessageId {
    pub fn queue(&self) -> &str {
        &self.0
    }

    pub fn index(&self) -> u64 {
        self.1
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.0, self.1)
    }
}

/// What a payload means to its consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MessageKind {
    /// Expects a reply on the named queue.
    Request { reply_to: String },
    /// Correlates to an earlier request.
    Response { in_reply_to: MessageId },
}

/// An opaque payload plus its routing kind. The broker never
/// interprets the payload bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
    pub kind: MessageKind,
}

/// Who enqueued a message: a logged-in session, or a bare connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "origin", rename_all = "lowercase")]
pub enum Origin {
    Anonymous { conn: u64 },
    Named { session: String },
}

/// All client → broker requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Login {
        session: String,
    },
    CreatePersistent {
        name: String,
    },
    CreateTransient {
        name: String,
    },
    Destroy {
        name: String,
    },
    Send {
        queue: String,
        message: Message,
    },
    Ack {
        id: MessageId,
    },
    Transfer {
        /// String-encoded cursor from a previous Transfer's `next`.
        /// Absent means "everything".
        #[serde(default)]
        from: Option<String>,
        timeout: f64,
        queues: Vec<String>,
    },
    Trace {
        #[serde(default = "all_events")]
        from: i64,
        timeout: f64,
    },
    List {
        prefix: String,
    },
    Diagnostics,
    Get {
        path: String,
    },
}

fn all_events() -> i64 {
    -1
}

/// All broker → client responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Login,
    Create {
        name: String,
    },
    Destroy,
    Send {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<MessageId>,
    },
    Ack,
    Transfer {
        messages: Vec<TransferItem>,
        /// Cursor to pass as `from` on the next Transfer.
        next: String,
    },
    Trace {
        events: Vec<TracedEvent>,
    },
    List {
        names: Vec<String>,
    },
    Diagnostics {
        snapshot: DiagnosticsSnapshot,
    },
    Get {
        #[serde(with = "serde_bytes")]
        body: Vec<u8>,
    },
    NotLoggedIn,
    Error {
        reason: String,
    },
}

/// One delivered message in a Transfer result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferItem {
    pub id: MessageId,
    pub message: Message,
}

/// One recorded broker event plus its ring cursor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TracedEvent {
    pub cursor: u64,
    pub event: TraceEvent,
}

/// A broker event: an enqueue, a delivery, or an ack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    /// Wall-clock seconds.
    pub time: f64,
    /// Session that produced the message (enqueue/ack side).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
    /// Session that consumed the message (delivery side).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    pub queue: String,
    pub item: TraceItem,
    /// For a delivered Response whose correlated Request is still
    /// queued: nanoseconds between the two enqueues.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_ns: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TraceItem {
    Message { id: MessageId, message: Message },
    Ack { id: MessageId },
}

/// Broker state snapshot returned by Diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsSnapshot {
    pub current_ns: u64,
    pub permanent: Vec<QueueSnapshot>,
    pub transient: Vec<QueueSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_transfer_expected_ns: Option<u64>,
    pub entries: Vec<EntrySnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntrySnapshot {
    pub id: MessageId,
    pub origin: Origin,
    pub enqueued_at_ns: u64,
    pub message: Message,
}

/// Minimal envelope for extracting the verb from unknown requests.
///
/// Fallback when [`Request`] deserialization fails (e.g. an unknown
/// `type` tag), so the broker can answer with an error instead of
/// dropping the connection.
#[derive(Debug, Deserialize)]
pub struct RawEnvelope {
    #[serde(rename = "type")]
    pub verb: String,
}

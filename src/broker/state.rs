//! Broker state — queue directory, connection/session relation,
//! transient registry, trace ring.
//!
//! All methods are pure state transitions with no I/O. The state is
//! owned exclusively by the broker loop; serialization of every
//! mutation follows from that ownership.

use std::collections::{HashMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::ipc::protocol::{DiagnosticsSnapshot, EntrySnapshot, MessageId, Origin, QueueSnapshot};

use super::clock::Clock;
use super::directory::Directory;
use super::relation::Relation;
use super::trace::{DEFAULT_TRACE_CAPACITY, TraceRing};

/// Broker configuration.
#[derive(Debug, Clone)]
pub struct SwitchConfig {
    /// Root directory served by the Get verb.
    pub www_root: PathBuf,
    /// Number of trace events retained.
    pub trace_capacity: usize,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            www_root: PathBuf::from("www"),
            trace_capacity: DEFAULT_TRACE_CAPACITY,
        }
    }
}

/// Unique identifier for a transport connection.
///
/// Monotonically increasing counter; doubles as the anonymous origin
/// for enqueues from connections that never logged in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

#[derive(Debug)]
pub struct BrokerState {
    clock: Clock,
    directory: Directory,
    /// conn_id ↔ session. A conn_id is kept to at most one session;
    /// re-login replaces the prior mapping.
    connections: Relation<ConnectionId, String>,
    /// session → queue names destroyed when the session goes inactive.
    transients: HashMap<String, HashSet<String>>,
    trace: TraceRing,
    config: SwitchConfig,
}

impl BrokerState {
    pub fn new(config: SwitchConfig) -> Self {
        Self {
            clock: Clock::new(),
            directory: Directory::new(),
            connections: Relation::new(),
            transients: HashMap::new(),
            trace: TraceRing::new(config.trace_capacity),
            config,
        }
    }

    pub fn now_ns(&self) -> u64 {
        self.clock.now_ns()
    }

    pub fn wall_seconds(&self) -> f64 {
        self.clock.wall_seconds()
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn directory_mut(&mut self) -> &mut Directory {
        &mut self.directory
    }

    pub fn trace(&self) -> &TraceRing {
        &self.trace
    }

    pub fn trace_mut(&mut self) -> &mut TraceRing {
        &mut self.trace
    }

    // -- Connections / sessions --

    /// Attach a connection to a session, replacing any prior mapping
    /// for that connection. If the replacement left the prior session
    /// without connections, its transients are reclaimed.
    pub fn login(&mut self, conn: ConnectionId, session: String) {
        let prior = self.connections.remove_left(&conn);
        self.connections.add(conn, session);
        for old in prior {
            if !self.is_active(&old) {
                self.reclaim(&old);
            }
        }
    }

    pub fn session_of(&self, conn: ConnectionId) -> Option<String> {
        self.connections
            .right_of(&conn)
            .and_then(|sessions| sessions.iter().next())
            .cloned()
    }

    /// Named(session) for logged-in connections, Anonymous otherwise.
    pub fn origin_of(&self, conn: ConnectionId) -> Origin {
        match self.session_of(conn) {
            Some(session) => Origin::Named { session },
            None => Origin::Anonymous { conn: conn.value() },
        }
    }

    pub fn is_active(&self, session: &str) -> bool {
        self.connections.contains_right(&session.to_string())
    }

    /// Connection-closed hook: detach the connection and reclaim the
    /// transients of any session this made inactive.
    pub fn remove_connection(&mut self, conn: ConnectionId) {
        let sessions = self.connections.remove_left(&conn);
        for session in sessions {
            if !self.is_active(&session) {
                self.reclaim(&session);
            }
        }
    }

    // -- Transient registry --

    pub fn register_transient(&mut self, session: &str, name: &str) {
        self.transients
            .entry(session.to_string())
            .or_default()
            .insert(name.to_string());
    }

    /// Destroy every queue registered to this session and forget it.
    fn reclaim(&mut self, session: &str) {
        if let Some(names) = self.transients.remove(session) {
            for name in names {
                self.directory.remove(&name);
            }
        }
    }

    /// Union of all registered transient queue names.
    fn transient_names(&self) -> HashSet<&str> {
        self.transients
            .values()
            .flat_map(|names| names.iter().map(String::as_str))
            .collect()
    }

    // -- Snapshots --

    pub fn diagnostics(&self) -> DiagnosticsSnapshot {
        let transient_names = self.transient_names();
        let mut permanent = Vec::new();
        let mut transient = Vec::new();
        for queue in self.directory.iter() {
            let snapshot = QueueSnapshot {
                name: queue.name().to_string(),
                next_transfer_expected_ns: queue.next_transfer_expected(),
                entries: queue
                    .contents()
                    .map(|(index, entry)| EntrySnapshot {
                        id: MessageId(queue.name().to_string(), index),
                        origin: entry.origin.clone(),
                        enqueued_at_ns: entry.enqueued_at_ns,
                        message: entry.message.clone(),
                    })
                    .collect(),
            };
            if transient_names.contains(queue.name()) {
                transient.push(snapshot);
            } else {
                permanent.push(snapshot);
            }
        }
        permanent.sort_by(|a, b| a.name.cmp(&b.name));
        transient.sort_by(|a, b| a.name.cmp(&b.name));
        DiagnosticsSnapshot {
            current_ns: self.clock.now_ns(),
            permanent,
            transient,
        }
    }

    // -- Static assets --

    /// Resolve a Get path under the asset root. An empty path means
    /// `index.html`; anything escaping the root resolves to nothing.
    pub fn resolve_asset(&self, path: &str) -> Option<PathBuf> {
        let trimmed = path.trim_start_matches('/');
        let name = if trimmed.is_empty() { "index.html" } else { trimmed };
        let relative = Path::new(name);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return None;
        }
        Some(self.config.www_root.join(relative))
    }
}

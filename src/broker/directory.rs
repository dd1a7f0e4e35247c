//! Queue directory — the single owner of every live queue.
//!
//! Removal drops the queue, which closes its wake channel; that is
//! how outstanding waiters learn about deletion (see
//! [`Queue::subscribe`]).

use std::collections::HashMap;

use super::queue::Queue;

#[derive(Debug, Default)]
pub struct Directory {
    queues: HashMap<String, Queue>,
}

impl Directory {
    pub fn new() -> Self {
        Self {
            queues: HashMap::new(),
        }
    }

    /// Create a queue if absent. Creating an existing name is a no-op
    /// and preserves its contents.
    pub fn add(&mut self, name: &str) {
        if !self.queues.contains_key(name) {
            self.queues.insert(name.to_string(), Queue::new(name.to_string()));
        }
    }

    /// Remove a queue, evicting its contents and waking its waiters
    /// with the deletion signal. Idempotent for absent names.
    pub fn remove(&mut self, name: &str) -> bool {
        self.queues.remove(name).is_some()
    }

    pub fn find(&self, name: &str) -> Option<&Queue> {
        self.queues.get(name)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut Queue> {
        self.queues.get_mut(name)
    }

    /// Queue names starting with `prefix`, sorted. An empty prefix
    /// lists everything.
    pub fn list(&self, prefix: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .queues
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn iter(&self) -> impl Iterator<Item = &Queue> {
        self.queues.values()
    }
}

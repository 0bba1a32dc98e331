//! Topic subscriptions.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use serde_json::Value;

/// Callback invoked for every publication on a topic.
pub type Callback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Registrations per topic, in registration order.
#[derive(Default)]
pub(crate) struct SubscriptionTable {
    next_id: u64,
    topics: HashMap<String, Vec<(u64, Callback)>>,
}

impl SubscriptionTable {
    pub(crate) fn register(&mut self, topic: &str, callback: Callback) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.topics.entry(topic.to_string()).or_default().push((id, callback));
        id
    }

    /// Remove one registration. Returns whether it was present.
    pub(crate) fn unregister(&mut self, topic: &str, id: u64) -> bool {
        let Some(entries) = self.topics.get_mut(topic) else {
            return false;
        };
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        let removed = entries.len() != before;
        if entries.is_empty() {
            self.topics.remove(topic);
        }
        removed
    }

    /// Callbacks registered on `topic`, cloned so they run without the lock.
    pub(crate) fn callbacks(&self, topic: &str) -> Vec<Callback> {
        self.topics
            .get(topic)
            .map(|entries| entries.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default()
    }

    pub(crate) fn count(&self, topic: &str) -> usize {
        self.topics.get(topic).map_or(0, Vec::len)
    }
}

/// A registration made ahead of `Ready`.
///
/// Dropped without being claimed, it removes the registration again.
pub(crate) struct PendingRegistration {
    topic: String,
    id: u64,
    table: Arc<Mutex<SubscriptionTable>>,
    claimed: bool,
}

impl PendingRegistration {
    pub(crate) fn new(topic: String, id: u64, table: Arc<Mutex<SubscriptionTable>>) -> Self {
        Self { topic, id, table, claimed: false }
    }

    pub(crate) fn claim(mut self) -> Subscription {
        self.claimed = true;
        Subscription::new(self.topic.clone(), self.id, Arc::downgrade(&self.table))
    }
}

impl Drop for PendingRegistration {
    fn drop(&mut self) {
        if self.claimed {
            return;
        }
        self.table.lock().unwrap_or_else(PoisonError::into_inner).unregister(&self.topic, self.id);
    }
}

/// A live registration on a topic.
///
/// Dropping the handle does not unsubscribe; call [`Subscription::unsubscribe`].
pub struct Subscription {
    topic: String,
    id: u64,
    table: Weak<Mutex<SubscriptionTable>>,
    removed: AtomicBool,
}

impl Subscription {
    pub(crate) fn new(topic: String, id: u64, table: Weak<Mutex<SubscriptionTable>>) -> Self {
        Self { topic, id, table, removed: AtomicBool::new(false) }
    }

    /// Topic this subscription listens on.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Whether `unsubscribe` has not been called yet.
    pub fn is_active(&self) -> bool {
        !self.removed.load(Ordering::SeqCst)
    }

    /// Remove this registration. Calling it again does nothing.
    pub fn unsubscribe(&self) {
        if self.removed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(table) = self.table.upgrade() {
            if let Ok(mut table) = table.lock() {
                table.unregister(&self.topic, self.id);
            }
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

//! Entity state store
//!
//! Holds the latest known state of every light entity behind an
//! [`arc_swap::ArcSwap`], so readers grab a coherent snapshot without
//! blocking writers. Writers publish a new snapshot per update and
//! interested parties get a change notification per entity touched.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use arc_swap::ArcSwap;
use tokio::sync::mpsc;
use tracing::trace;

use crate::light::EntityState;

/// Notification that an entity's state was set or removed.
#[derive(Debug, Clone)]
pub struct StateChanged {
    pub entity_id: String,
}

/// Immutable point-in-time view of every entity state.
#[derive(Debug, Clone, Default)]
pub struct StoreSnapshot {
    pub entities: HashMap<String, EntityState>,
}

impl StoreSnapshot {
    pub fn get(&self, entity_id: &str) -> Option<&EntityState> {
        self.entities.get(entity_id)
    }
}

/// Concurrent state store shared by groups, lights, and the API.
pub struct StateStore {
    snapshot: ArcSwap<StoreSnapshot>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<StateChanged>>>,
}

impl StateStore {
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(StoreSnapshot::default()),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Current snapshot. Cheap; later writes do not show through it.
    pub fn snapshot(&self) -> Arc<StoreSnapshot> {
        self.snapshot.load_full()
    }

    /// Latest state of one entity, if it has ever reported.
    pub fn get(&self, entity_id: &str) -> Option<EntityState> {
        self.snapshot.load().get(entity_id).cloned()
    }

    /// Publish a new state for `entity_id` and notify subscribers.
    pub fn set(&self, entity_id: &str, state: EntityState) {
        trace!("store: set {} -> {}", entity_id, state.power);
        self.snapshot.rcu(|current| {
            let mut next = StoreSnapshot::clone(current);
            next.entities.insert(entity_id.to_string(), state.clone());
            next
        });
        self.notify(entity_id);
    }

    /// Drop `entity_id` from the store. Returns whether it was present,
    /// and notifies subscribers if it was.
    pub fn remove(&self, entity_id: &str) -> bool {
        let previous = self.snapshot.rcu(|current| {
            let mut next = StoreSnapshot::clone(current);
            next.entities.remove(entity_id);
            next
        });
        let removed = previous.entities.contains_key(entity_id);
        if removed {
            trace!("store: removed {}", entity_id);
            self.notify(entity_id);
        }
        removed
    }

    /// Register for change notifications. Every `set` and successful
    /// `remove` delivers one [`StateChanged`] to each live subscriber.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<StateChanged> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(tx);
        }
        rx
    }

    fn notify(&self, entity_id: &str) {
        if let Ok(mut subscribers) = self.subscribers.lock() {
            // Dropped receivers are pruned on the first failed send.
            subscribers.retain(|tx| {
                tx.send(StateChanged {
                    entity_id: entity_id.to_string(),
                })
                .is_ok()
            });
        }
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

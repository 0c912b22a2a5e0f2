//! Group lifecycle management
//!
//! Owns the mapping from composite entity id to running group actor, wires
//! each group into the service bus, and tears the whole set down again on
//! shutdown. Nothing else in the daemon holds group state.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::info;

use super::group::GroupHandle;
use super::group::LightGroup;
use crate::bus::ServiceBus;
use crate::config::Config;
use crate::light::light_entity_id;
use crate::store::StateStore;

/// Static description of one group, as configured.
#[derive(Debug, Clone, Serialize)]
pub struct GroupDescriptor {
    pub entity_id: String,
    pub name: String,
    pub members: Vec<String>,
}

struct GroupEntry {
    handle: GroupHandle,
    task: JoinHandle<()>,
    descriptor: GroupDescriptor,
}

/// Registry of running groups, keyed by composite entity id.
pub struct GroupManager {
    store: Arc<StateStore>,
    bus: Arc<ServiceBus>,
    groups: HashMap<String, GroupEntry>,
}

impl GroupManager {
    pub fn new(store: Arc<StateStore>, bus: Arc<ServiceBus>) -> Self {
        Self {
            store,
            bus,
            groups: HashMap::new(),
        }
    }

    /// Spawn every group in `config`, in a stable order.
    pub fn from_config(store: Arc<StateStore>, bus: Arc<ServiceBus>, config: &Config) -> Self {
        let mut manager = Self::new(store, bus);

        let mut keys: Vec<&String> = config.groups.keys().collect();
        keys.sort();
        for key in keys {
            let group = &config.groups[key];
            manager.spawn_group(GroupDescriptor {
                entity_id: light_entity_id(key),
                name: group.name.clone().unwrap_or_else(|| key.clone()),
                members: group.members.clone(),
            });
        }

        manager
    }

    /// Start one group actor and register it with the bus so it can be
    /// targeted by service calls like any other light. Spawning a second
    /// group with the same entity id replaces the first.
    pub fn spawn_group(&mut self, descriptor: GroupDescriptor) -> GroupHandle {
        let group = LightGroup::new(
            descriptor.entity_id.clone(),
            descriptor.name.clone(),
            descriptor.members.clone(),
            self.store.clone(),
            self.bus.clone(),
        );
        let (handle, task) = group.spawn();

        self.bus
            .register(&descriptor.entity_id, Arc::new(handle.clone()));
        if let Some(previous) = self.groups.insert(
            descriptor.entity_id.clone(),
            GroupEntry {
                handle: handle.clone(),
                task,
                descriptor,
            },
        ) {
            previous.task.abort();
        }

        handle
    }

    pub fn get(&self, entity_id: &str) -> Option<&GroupHandle> {
        self.groups.get(entity_id).map(|entry| &entry.handle)
    }

    /// Configured groups, sorted by entity id.
    pub fn descriptors(&self) -> Vec<GroupDescriptor> {
        let mut descriptors: Vec<GroupDescriptor> = self
            .groups
            .values()
            .map(|entry| entry.descriptor.clone())
            .collect();
        descriptors.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        descriptors
    }

    /// Stop a group: detach it from the bus, stop its actor, and drop its
    /// composite state so observers (including parent groups) see it go.
    pub async fn remove_group(&mut self, entity_id: &str) -> bool {
        let Some(entry) = self.groups.remove(entity_id) else {
            return false;
        };

        self.bus.unregister(entity_id);
        entry.task.abort();
        let _ = entry.task.await;
        self.store.remove(entity_id);
        info!("group {} removed", entity_id);
        true
    }

    /// Tear down every group.
    pub async fn shutdown(mut self) {
        let ids: Vec<String> = self.groups.keys().cloned().collect();
        for id in ids {
            self.remove_group(&id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use crate::light::EntityState;
    use crate::light::PowerState;

    async fn wait_for_gone(store: &StateStore, entity_id: &str) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while store.get(entity_id).is_some() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("entity never left the store");
    }

    async fn wait_for_power(store: &StateStore, entity_id: &str, power: PowerState) {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if store.get(entity_id).map(|s| s.power) == Some(power) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("entity never reached the expected power state");
    }

    fn descriptor(entity_id: &str, members: &[&str]) -> GroupDescriptor {
        GroupDescriptor {
            entity_id: entity_id.to_string(),
            name: entity_id.to_string(),
            members: members.iter().map(|id| id.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn spawned_groups_publish_and_are_listed() {
        let store = Arc::new(StateStore::new());
        let bus = Arc::new(ServiceBus::new());
        let mut manager = GroupManager::new(store.clone(), bus);

        manager.spawn_group(descriptor("light.downstairs", &["light.kitchen"]));
        manager.spawn_group(descriptor("light.all", &["light.downstairs"]));

        wait_for_power(&store, "light.downstairs", PowerState::Unavailable).await;
        let listed = manager.descriptors();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].entity_id, "light.all");
        assert_eq!(listed[1].entity_id, "light.downstairs");
        assert!(manager.get("light.downstairs").is_some());
        assert!(manager.get("light.ghost").is_none());
    }

    #[tokio::test]
    async fn removing_a_group_clears_its_composite_state() {
        let store = Arc::new(StateStore::new());
        let bus = Arc::new(ServiceBus::new());
        let mut manager = GroupManager::new(store.clone(), bus);

        manager.spawn_group(descriptor("light.downstairs", &["light.kitchen"]));
        store.set("light.kitchen", EntityState::new(PowerState::On));
        wait_for_power(&store, "light.downstairs", PowerState::On).await;

        assert!(manager.remove_group("light.downstairs").await);
        wait_for_gone(&store, "light.downstairs").await;
        assert!(!manager.remove_group("light.downstairs").await);
    }

    #[tokio::test]
    async fn removed_member_group_turns_its_parent_unavailable() {
        let store = Arc::new(StateStore::new());
        let bus = Arc::new(ServiceBus::new());
        let mut manager = GroupManager::new(store.clone(), bus);

        manager.spawn_group(descriptor("light.child", &["light.kitchen"]));
        manager.spawn_group(descriptor("light.parent", &["light.child"]));

        store.set("light.kitchen", EntityState::new(PowerState::On));
        wait_for_power(&store, "light.parent", PowerState::On).await;

        // Dropping the child leaves the parent with no reporting members.
        manager.remove_group("light.child").await;
        wait_for_power(&store, "light.parent", PowerState::Unavailable).await;
    }

    #[tokio::test]
    async fn shutdown_removes_every_group() {
        let store = Arc::new(StateStore::new());
        let bus = Arc::new(ServiceBus::new());
        let mut manager = GroupManager::new(store.clone(), bus);

        manager.spawn_group(descriptor("light.a", &["light.one"]));
        manager.spawn_group(descriptor("light.b", &["light.two"]));
        wait_for_power(&store, "light.a", PowerState::Unavailable).await;
        wait_for_power(&store, "light.b", PowerState::Unavailable).await;

        manager.shutdown().await;
        assert!(store.get("light.a").is_none());
        assert!(store.get("light.b").is_none());
    }
}

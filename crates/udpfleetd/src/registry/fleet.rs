//! The fleet registry handle.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel closure is reported as `RegistryError::ChannelClosed`

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use udpfleet_core::{Endpoint, GroupName, GroupState, WorkloadId};

use super::events::{GroupDeletion, GroupUpdate, RegistryError, Revision};

/// Registry contents guarded by the single lock.
#[derive(Default)]
struct Fleet {
    groups: HashMap<GroupName, GroupState>,
    /// Revision of the most recent notification
    revision: Revision,
}

impl Fleet {
    fn next_revision(&mut self) -> Revision {
        self.revision += 1;
        self.revision
    }
}

/// Handle to the fleet state registry.
///
/// Cheap to clone; every clone shares the same map, lock and channels.
///
/// Invariant: a group is present iff it has at least one receiver or one
/// sender. The operation that empties a group removes it and emits a
/// deletion notification in the same critical section.
///
/// The registry trusts its inputs. Validate at the boundary with
/// `GroupName::parse`, `WorkloadId::parse` and `Endpoint::parse`.
#[derive(Clone)]
pub struct FleetRegistry {
    fleet: Arc<Mutex<Fleet>>,
    updates: mpsc::Sender<GroupUpdate>,
    deletes: mpsc::Sender<GroupDeletion>,
}

impl FleetRegistry {
    pub(super) fn new(
        updates: mpsc::Sender<GroupUpdate>,
        deletes: mpsc::Sender<GroupDeletion>,
    ) -> Self {
        Self {
            fleet: Arc::new(Mutex::new(Fleet::default())),
            updates,
            deletes,
        }
    }

    /// Inserts or replaces the receiver endpoint of `workload` in `group`,
    /// creating the group if needed.
    ///
    /// Always emits an update, also when the endpoint was already present,
    /// so a redelivered event republishes the group.
    pub async fn add_receiver(
        &self,
        group: GroupName,
        port: u16,
        address: impl Into<String>,
        workload: WorkloadId,
    ) -> Result<(), RegistryError> {
        let endpoint = Endpoint::new(address, port);
        let mut fleet = self.fleet.lock().await;

        let state = fleet
            .groups
            .entry(group.clone())
            .or_insert_with(|| GroupState::new(group.clone()));
        let previous = state.receivers.insert(workload.clone(), endpoint.clone());

        if previous.as_ref() == Some(&endpoint) {
            debug!(group = %group, workload = %workload, "Receiver endpoint unchanged");
        } else {
            info!(
                group = %group,
                workload = %workload,
                address = %endpoint.address,
                port = endpoint.port,
                receivers = state.receiver_count(),
                "Added receiver endpoint"
            );
        }

        let state = state.clone();
        self.send_update(&mut fleet, state).await
    }

    /// Removes the receiver endpoint of `workload` from `group`.
    ///
    /// Unknown groups and workloads are a silent no-op.
    pub async fn remove_receiver(
        &self,
        group: GroupName,
        workload: WorkloadId,
    ) -> Result<(), RegistryError> {
        let mut fleet = self.fleet.lock().await;

        let removed = match fleet.groups.get_mut(&group) {
            Some(state) => state.receivers.remove(&workload).is_some(),
            None => false,
        };
        if !removed {
            debug!(group = %group, workload = %workload, "No such receiver, nothing to remove");
            return Ok(());
        }

        info!(group = %group, workload = %workload, "Removed receiver endpoint");
        self.settle(&mut fleet, &group).await
    }

    /// Adds `workload` to the senders of `group`, creating the group if
    /// needed. Senders are a set: a repeated add leaves it unchanged but
    /// still emits an update.
    pub async fn add_sender(
        &self,
        group: GroupName,
        workload: WorkloadId,
    ) -> Result<(), RegistryError> {
        let mut fleet = self.fleet.lock().await;

        let state = fleet
            .groups
            .entry(group.clone())
            .or_insert_with(|| GroupState::new(group.clone()));

        if state.senders.insert(workload.clone()) {
            info!(
                group = %group,
                workload = %workload,
                senders = state.sender_count(),
                "Added sender"
            );
        } else {
            debug!(group = %group, workload = %workload, "Sender already registered");
        }

        let state = state.clone();
        self.send_update(&mut fleet, state).await
    }

    /// Removes `workload` from the senders of `group`.
    ///
    /// Returns `true` iff this call removed the group's last sender. The
    /// flag is independent of whether the group itself was deleted:
    /// receivers may keep it alive.
    pub async fn remove_sender(
        &self,
        group: GroupName,
        workload: WorkloadId,
    ) -> Result<bool, RegistryError> {
        let mut fleet = self.fleet.lock().await;

        let removed = fleet
            .groups
            .get_mut(&group)
            .and_then(|state| state.senders.remove(&workload).then(|| state.senders.is_empty()));
        let Some(last_sender) = removed else {
            debug!(group = %group, workload = %workload, "No such sender, nothing to remove");
            return Ok(false);
        };

        info!(group = %group, workload = %workload, last_sender, "Removed sender");
        self.settle(&mut fleet, &group).await?;
        Ok(last_sender)
    }

    /// Returns a copy of one group.
    pub async fn group(&self, name: &GroupName) -> Option<GroupState> {
        self.fleet.lock().await.groups.get(name).cloned()
    }

    /// Returns copies of all groups, sorted by name.
    pub async fn groups(&self) -> Vec<GroupState> {
        let fleet = self.fleet.lock().await;
        let mut all: Vec<GroupState> = fleet.groups.values().cloned().collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }

    pub async fn group_count(&self) -> usize {
        self.fleet.lock().await.groups.len()
    }

    /// Publishes the outcome of a removal: deletes the group and emits a
    /// deletion if it is now empty, otherwise emits its new state.
    ///
    /// Must be called with the lock held.
    async fn settle(&self, fleet: &mut Fleet, name: &GroupName) -> Result<(), RegistryError> {
        let update = match fleet.groups.get(name) {
            Some(state) if state.is_empty() => None,
            Some(state) => Some(state.clone()),
            None => return Ok(()),
        };

        match update {
            Some(state) => self.send_update(fleet, state).await,
            None => {
                fleet.groups.remove(name);
                let revision = fleet.next_revision();
                info!(group = %name, revision, "Group has no receivers or senders, deleted");
                self.deletes
                    .send(GroupDeletion {
                        revision,
                        name: name.clone(),
                    })
                    .await
                    .map_err(|_| RegistryError::ChannelClosed { channel: "delete" })
            }
        }
    }

    /// Must be called with the lock held.
    async fn send_update(&self, fleet: &mut Fleet, group: GroupState) -> Result<(), RegistryError> {
        let revision = fleet.next_revision();
        self.updates
            .send(GroupUpdate { revision, group })
            .await
            .map_err(|_| RegistryError::ChannelClosed { channel: "update" })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc::error::TryRecvError;
    use tokio::time::timeout;

    use super::*;
    use crate::registry::{channel, Notifications};

    fn g(name: &str) -> GroupName {
        GroupName::new(name)
    }

    fn w(id: &str) -> WorkloadId {
        WorkloadId::new(id)
    }

    fn create_registry() -> (FleetRegistry, Notifications) {
        channel(64)
    }

    /// Existence invariant: a group is present iff it is non-empty.
    async fn assert_existence_invariant(registry: &FleetRegistry) {
        for group in registry.groups().await {
            assert!(!group.is_empty(), "empty group {} left in registry", group.name);
        }
    }

    fn next_update(notifications: &mut Notifications) -> GroupState {
        notifications.updates.try_recv().unwrap().group
    }

    fn next_delete(notifications: &mut Notifications) -> GroupName {
        notifications.deletes.try_recv().unwrap().name
    }

    fn assert_no_notifications(notifications: &mut Notifications) {
        assert!(matches!(notifications.updates.try_recv(), Err(TryRecvError::Empty)));
        assert!(matches!(notifications.deletes.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_add_receivers_accumulate() {
        let (registry, mut notifications) = create_registry();

        registry
            .add_receiver(g("edge"), 7000, "10.0.0.1", w("pod-1"))
            .await
            .unwrap();
        registry
            .add_receiver(g("edge"), 7000, "10.0.0.2", w("pod-2"))
            .await
            .unwrap();

        let first = next_update(&mut notifications);
        assert_eq!(first.receiver_count(), 1);

        let second = next_update(&mut notifications);
        assert_eq!(second.name, g("edge"));
        assert_eq!(second.receiver_count(), 2);
        assert_no_notifications(&mut notifications);
    }

    #[tokio::test]
    async fn test_add_receiver_updates_in_place() {
        let (registry, mut notifications) = create_registry();

        registry
            .add_receiver(g("edge"), 7000, "10.0.0.1", w("pod-1"))
            .await
            .unwrap();
        registry
            .add_receiver(g("edge"), 7100, "10.0.0.9", w("pod-1"))
            .await
            .unwrap();

        let _ = next_update(&mut notifications);
        let update = next_update(&mut notifications);
        assert_eq!(update.receiver_count(), 1);
        assert_eq!(
            update.receivers.get(&w("pod-1")),
            Some(&Endpoint::new("10.0.0.9", 7100))
        );
    }

    #[tokio::test]
    async fn test_identical_receiver_is_renotified_unchanged() {
        let (registry, mut notifications) = create_registry();

        registry
            .add_receiver(g("edge"), 7000, "10.0.0.1", w("pod-1"))
            .await
            .unwrap();
        let first = next_update(&mut notifications);

        registry
            .add_receiver(g("edge"), 7000, "10.0.0.1", w("pod-1"))
            .await
            .unwrap();
        let second = next_update(&mut notifications);

        assert_eq!(first, second);
        assert_eq!(second.receiver_count(), 1);
        assert_no_notifications(&mut notifications);
    }

    #[tokio::test]
    async fn test_duplicate_sender_counts_once() {
        let (registry, mut notifications) = create_registry();

        registry.add_sender(g("edge"), w("pod-s1")).await.unwrap();
        registry.add_sender(g("edge"), w("pod-s1")).await.unwrap();

        let group = registry.group(&g("edge")).await.unwrap();
        assert_eq!(group.sender_count(), 1);

        // Both adds notify; neither inflates the set.
        assert_eq!(next_update(&mut notifications).sender_count(), 1);
        assert_eq!(next_update(&mut notifications).sender_count(), 1);
        assert_no_notifications(&mut notifications);
    }

    #[tokio::test]
    async fn test_revisions_follow_mutation_order_across_channels() {
        let (registry, mut notifications) = create_registry();

        registry.add_sender(g("edge"), w("pod-s1")).await.unwrap();
        registry.remove_sender(g("edge"), w("pod-s1")).await.unwrap();
        registry.add_sender(g("edge"), w("pod-s1")).await.unwrap();
        registry.add_sender(g("core"), w("pod-s2")).await.unwrap();

        let first = notifications.updates.try_recv().unwrap();
        let deleted = notifications.deletes.try_recv().unwrap();
        let recreated = notifications.updates.try_recv().unwrap();
        let other = notifications.updates.try_recv().unwrap();

        assert_eq!(first.revision, 1);
        assert_eq!(deleted.revision, 2);
        assert_eq!(deleted.name, g("edge"));
        assert_eq!(recreated.revision, 3);
        assert_eq!(other.revision, 4);
        assert_no_notifications(&mut notifications);
    }

    #[tokio::test]
    async fn test_silent_removals_take_no_revision() {
        let (registry, mut notifications) = create_registry();

        registry.remove_receiver(g("edge"), w("pod-1")).await.unwrap();
        registry.add_sender(g("edge"), w("pod-s1")).await.unwrap();

        assert_eq!(notifications.updates.try_recv().unwrap().revision, 1);
    }

    #[tokio::test]
    async fn test_last_sender_removal_deletes_group() {
        let (registry, mut notifications) = create_registry();

        registry.add_sender(g("edge"), w("pod-s1")).await.unwrap();
        let _ = next_update(&mut notifications);

        let last = registry.remove_sender(g("edge"), w("pod-s1")).await.unwrap();
        assert!(last);
        assert!(registry.group(&g("edge")).await.is_none());

        assert_eq!(next_delete(&mut notifications), g("edge"));
        assert_no_notifications(&mut notifications);
    }

    #[tokio::test]
    async fn test_remove_sender_with_remaining_senders() {
        let (registry, mut notifications) = create_registry();

        registry.add_sender(g("edge"), w("pod-10")).await.unwrap();
        registry.add_sender(g("edge"), w("pod-11")).await.unwrap();
        let _ = next_update(&mut notifications);
        let _ = next_update(&mut notifications);

        let last = registry.remove_sender(g("edge"), w("pod-11")).await.unwrap();
        assert!(!last);

        let update = next_update(&mut notifications);
        assert_eq!(update.sender_count(), 1);
        assert_no_notifications(&mut notifications);
    }

    #[tokio::test]
    async fn test_last_sender_with_receivers_keeps_group() {
        let (registry, mut notifications) = create_registry();

        registry.add_sender(g("edge"), w("pod-10")).await.unwrap();
        registry
            .add_receiver(g("edge"), 1000, "10.0.0.1", w("pod-1"))
            .await
            .unwrap();
        let _ = next_update(&mut notifications);
        let _ = next_update(&mut notifications);

        let last = registry.remove_sender(g("edge"), w("pod-10")).await.unwrap();
        assert!(last, "last sender flag is independent of group deletion");
        assert!(registry.group(&g("edge")).await.is_some());

        let update = next_update(&mut notifications);
        assert_eq!(update.sender_count(), 0);
        assert_eq!(update.receiver_count(), 1);
        assert_no_notifications(&mut notifications);

        registry.remove_receiver(g("edge"), w("pod-1")).await.unwrap();
        assert_eq!(next_delete(&mut notifications), g("edge"));
        assert_eq!(registry.group_count().await, 0);
    }

    #[tokio::test]
    async fn test_receiver_only_group_deleted_on_last_removal() {
        let (registry, mut notifications) = create_registry();

        registry
            .add_receiver(g("edge"), 7000, "10.0.0.1", w("pod-1"))
            .await
            .unwrap();
        let _ = next_update(&mut notifications);

        registry.remove_receiver(g("edge"), w("pod-1")).await.unwrap();

        assert!(registry.group(&g("edge")).await.is_none());
        assert_eq!(next_delete(&mut notifications), g("edge"));
        assert_no_notifications(&mut notifications);
    }

    #[tokio::test]
    async fn test_remove_receiver_keeps_remaining() {
        let (registry, mut notifications) = create_registry();

        registry
            .add_receiver(g("test"), 1000, "10.0.0.1", w("pod-1"))
            .await
            .unwrap();
        registry
            .add_receiver(g("test"), 1000, "10.0.0.0", w("pod-2"))
            .await
            .unwrap();
        let _ = next_update(&mut notifications);
        let _ = next_update(&mut notifications);

        registry.remove_receiver(g("test"), w("pod-1")).await.unwrap();

        let update = next_update(&mut notifications);
        assert!(update.receivers.contains_key(&w("pod-2")));
        assert_eq!(update.receiver_count(), 1);
    }

    #[tokio::test]
    async fn test_removals_on_empty_registry_are_silent() {
        let (registry, mut notifications) = create_registry();

        assert!(!registry.remove_sender(g("fail"), w("fail")).await.unwrap());
        registry.remove_receiver(g("fail"), w("error")).await.unwrap();

        assert_eq!(registry.group_count().await, 0);
        assert_no_notifications(&mut notifications);
    }

    #[tokio::test]
    async fn test_removals_of_unknown_workload_are_silent() {
        let (registry, mut notifications) = create_registry();

        registry.add_sender(g("edge"), w("pod-s1")).await.unwrap();
        registry
            .add_receiver(g("edge"), 7000, "10.0.0.1", w("pod-1"))
            .await
            .unwrap();
        let _ = next_update(&mut notifications);
        let _ = next_update(&mut notifications);
        let before = registry.group(&g("edge")).await;

        assert!(!registry.remove_sender(g("edge"), w("pod-x")).await.unwrap());
        registry.remove_receiver(g("edge"), w("pod-y")).await.unwrap();

        assert_eq!(registry.group(&g("edge")).await, before);
        assert_no_notifications(&mut notifications);
    }

    #[tokio::test]
    async fn test_repeated_last_sender_removal() {
        let (registry, mut notifications) = create_registry();

        registry.add_sender(g("test"), w("pod-10")).await.unwrap();
        assert!(registry.remove_sender(g("test"), w("pod-10")).await.unwrap());
        assert!(!registry.remove_sender(g("test"), w("pod-10")).await.unwrap());

        let _ = next_update(&mut notifications);
        assert_eq!(next_delete(&mut notifications), g("test"));
        assert_no_notifications(&mut notifications);
    }

    #[tokio::test]
    async fn test_existence_invariant_after_every_mutation() {
        let (registry, _notifications) = create_registry();

        registry.add_sender(g("a"), w("s1")).await.unwrap();
        assert_existence_invariant(&registry).await;
        registry.add_receiver(g("a"), 1, "10.0.0.1", w("r1")).await.unwrap();
        assert_existence_invariant(&registry).await;
        registry.add_receiver(g("b"), 2, "10.0.0.2", w("r2")).await.unwrap();
        assert_existence_invariant(&registry).await;
        registry.remove_receiver(g("a"), w("r1")).await.unwrap();
        assert_existence_invariant(&registry).await;
        registry.remove_sender(g("a"), w("s1")).await.unwrap();
        assert_existence_invariant(&registry).await;
        registry.remove_receiver(g("b"), w("r2")).await.unwrap();
        assert_existence_invariant(&registry).await;

        assert_eq!(registry.group_count().await, 0);
    }

    #[tokio::test]
    async fn test_groups_sorted_by_name() {
        let (registry, _notifications) = create_registry();

        registry.add_sender(g("zulu"), w("s1")).await.unwrap();
        registry.add_sender(g("alpha"), w("s1")).await.unwrap();

        let names: Vec<String> = registry
            .groups()
            .await
            .into_iter()
            .map(|s| s.name.to_string())
            .collect();
        assert_eq!(names, vec!["alpha", "zulu"]);
    }

    #[tokio::test]
    async fn test_closed_channel_is_reported() {
        let (registry, notifications) = create_registry();
        drop(notifications);

        let err = registry.add_sender(g("edge"), w("pod-s1")).await.unwrap_err();
        assert_eq!(err, RegistryError::ChannelClosed { channel: "update" });

        let err = registry.remove_sender(g("edge"), w("pod-s1")).await.unwrap_err();
        assert_eq!(err, RegistryError::ChannelClosed { channel: "delete" });
    }

    #[tokio::test]
    async fn test_stalled_consumer_blocks_all_groups() {
        let (registry, mut notifications) = channel(1);

        // Fills the single slot.
        registry.add_sender(g("a"), w("s1")).await.unwrap();

        // Blocks on send while holding the lock.
        let blocked = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.add_sender(g("a"), w("s2")).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // A different group cannot get the lock either.
        let other = timeout(
            Duration::from_millis(50),
            registry.add_sender(g("b"), w("s1")),
        )
        .await;
        assert!(other.is_err(), "mutation on another group should be blocked");

        assert_eq!(notifications.updates.recv().await.unwrap().group.sender_count(), 1);
        blocked.await.unwrap().unwrap();
        assert_eq!(notifications.updates.recv().await.unwrap().group.sender_count(), 2);
    }
}

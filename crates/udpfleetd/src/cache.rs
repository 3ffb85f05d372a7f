//! Process-wide snapshot cache.
//!
//! Holds at most one snapshot per proxy group name, always the most
//! recently published one. Each name has a `watch` slot so discovery
//! streams are woken when their node's snapshot changes.
//!
//! Updates and deletions arrive from two independent loops. The registry
//! revision carried by every snapshot and deletion decides which one wins:
//! a deletion never clears a snapshot built after it, and a snapshot built
//! before a deletion is never published after it.
//!
//! The synchronizer holds the [`SnapshotCache`] (writer); the discovery
//! server only ever gets a [`CacheReader`].

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{watch, RwLock};
use tracing::debug;

use udpfleet_core::GroupName;

use crate::registry::Revision;
use crate::sync::Snapshot;

/// Receiving side of a node's slot. `None` means no snapshot is published.
pub type SnapshotWatch = watch::Receiver<Option<Arc<Snapshot>>>;

type Slot = watch::Sender<Option<Arc<Snapshot>>>;

#[derive(Default)]
struct State {
    slots: HashMap<GroupName, Slot>,

    /// Latest deletion revision of each name with no newer snapshot.
    cleared: HashMap<GroupName, Revision>,
}

impl State {
    fn published_revision(&self, node: &GroupName) -> Option<Revision> {
        let slot = self.slots.get(node)?;
        slot.borrow().as_ref().map(|s| s.revision)
    }
}

/// Writer handle to the snapshot cache.
#[derive(Clone, Default)]
pub struct SnapshotCache {
    state: Arc<RwLock<State>>,
}

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read-only view for the discovery server.
    pub fn reader(&self) -> CacheReader {
        CacheReader {
            state: Arc::clone(&self.state),
        }
    }

    /// Publishes `snapshot` for its node, replacing any previous one and
    /// waking every watcher of that node.
    ///
    /// Returns `None` without publishing when the node was deleted at a
    /// later revision than the one the snapshot was built from.
    pub async fn set_snapshot(&self, snapshot: Snapshot) -> Option<Arc<Snapshot>> {
        let mut state = self.state.write().await;

        if let Some(&deleted_at) = state.cleared.get(&snapshot.node) {
            if snapshot.revision < deleted_at {
                debug!(
                    node = %snapshot.node,
                    revision = snapshot.revision,
                    deleted_at,
                    "Snapshot predates deletion, not publishing"
                );
                return None;
            }
            state.cleared.remove(&snapshot.node);
        }

        let snapshot = Arc::new(snapshot);
        match state.slots.get(&snapshot.node) {
            Some(slot) => {
                slot.send_replace(Some(Arc::clone(&snapshot)));
            }
            None => {
                let (slot, _) = watch::channel(Some(Arc::clone(&snapshot)));
                state.slots.insert(snapshot.node.clone(), slot);
            }
        }

        debug!(node = %snapshot.node, version = snapshot.version, "Snapshot published");
        Some(snapshot)
    }

    /// Removes the snapshot for `node` on behalf of the deletion at
    /// `revision`. Returns whether a snapshot was removed.
    ///
    /// A snapshot built from a later revision belongs to a recreated group
    /// and is kept. Watchers stay subscribed and see `None`; the slot
    /// itself is dropped once nobody watches it.
    pub async fn clear_snapshot(&self, node: &GroupName, revision: Revision) -> bool {
        let mut state = self.state.write().await;

        if let Some(published) = state.published_revision(node) {
            if published > revision {
                debug!(
                    node = %node,
                    revision,
                    published,
                    "Deletion predates published snapshot, keeping it"
                );
                return false;
            }
        }

        let deleted_at = state.cleared.entry(node.clone()).or_insert(revision);
        *deleted_at = (*deleted_at).max(revision);

        let Some(slot) = state.slots.get(node) else {
            return false;
        };
        let had_snapshot = slot.borrow().is_some();

        if slot.receiver_count() == 0 {
            state.slots.remove(node);
        } else {
            slot.send_replace(None);
        }

        had_snapshot
    }
}

/// Read-only handle to the snapshot cache.
#[derive(Clone)]
pub struct CacheReader {
    state: Arc<RwLock<State>>,
}

impl CacheReader {
    /// Current snapshot for `node`, if any.
    pub async fn snapshot(&self, node: &GroupName) -> Option<Arc<Snapshot>> {
        let state = self.state.read().await;
        state.slots.get(node).and_then(|slot| slot.borrow().clone())
    }

    /// All published snapshots, sorted by node.
    pub async fn snapshots(&self) -> Vec<Arc<Snapshot>> {
        let state = self.state.read().await;
        let mut all: Vec<Arc<Snapshot>> = state
            .slots
            .values()
            .filter_map(|slot| slot.borrow().clone())
            .collect();
        all.sort_by(|a, b| a.node.cmp(&b.node));
        all
    }

    /// Subscribes to `node`. The receiver's current value is the snapshot
    /// published right now, or `None` if there is none yet.
    ///
    /// Pair with [`CacheReader::release`] once the receiver is dropped.
    pub async fn watch(&self, node: &GroupName) -> SnapshotWatch {
        if let Some(slot) = self.state.read().await.slots.get(node) {
            return slot.subscribe();
        }

        let mut state = self.state.write().await;
        state
            .slots
            .entry(node.clone())
            .or_insert_with(|| watch::channel(None).0)
            .subscribe()
    }

    /// Drops the slot for `node` if it is empty and nobody watches it.
    /// Returns whether a slot was dropped.
    pub async fn release(&self, node: &GroupName) -> bool {
        let mut state = self.state.write().await;

        let idle = match state.slots.get(node) {
            Some(slot) => slot.receiver_count() == 0 && slot.borrow().is_none(),
            None => false,
        };
        if idle {
            state.slots.remove(node);
            debug!(node = %node, "Released idle watch slot");
        }

        idle
    }

    /// Number of watch slots, published or not.
    pub async fn slot_count(&self) -> usize {
        self.state.read().await.slots.len()
    }
}

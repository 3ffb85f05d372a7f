//! Snapshot synchronizer.
//!
//! Two single-consumer loops drain the registry's notification channels:
//! - the update loop turns each group copy into a versioned snapshot,
//!   checks it and publishes it to the cache
//! - the delete loop purges the cache entry of each deleted group
//!
//! Each loop sees its channel in the registry's mutation order. The two
//! loops are not ordered relative to each other; the cache compares the
//! registry revisions of updates and deletions instead.
//!
//! An inconsistent snapshot stops the update loop with an error and must
//! never reach the cache. The daemon treats any loop exit as fatal.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use udpfleet_core::GroupName;

use crate::cache::SnapshotCache;
use crate::registry::{GroupDeletion, GroupUpdate, Notifications};

mod snapshot;
mod version;

pub use snapshot::{build_snapshot, Snapshot, SnapshotError};
pub use version::VersionCounter;

/// Spawns both synchronizer loops on the runtime.
pub fn spawn_synchronizer(cache: SnapshotCache, notifications: Notifications) -> SyncHandle {
    let Notifications { updates, deletes } = notifications;

    let update_task = tokio::spawn(run_update_loop(cache.clone(), updates));
    let delete_task = tokio::spawn(run_delete_loop(cache, deletes));

    SyncHandle {
        update_task,
        delete_task,
    }
}

/// Builds, checks and publishes a snapshot for every group update.
///
/// Returns `Ok(())` when the channel closes, or the first consistency
/// failure. The failing snapshot is not published.
pub async fn run_update_loop(
    cache: SnapshotCache,
    mut updates: mpsc::Receiver<GroupUpdate>,
) -> Result<(), SyncError> {
    info!("Starting snapshot update loop");
    let mut versions = VersionCounter::new();

    while let Some(GroupUpdate { revision, group }) = updates.recv().await {
        let version = versions.next(&group.name);
        let snapshot = build_snapshot(&group, version, revision);

        if let Err(e) = snapshot.consistent() {
            error!(
                node = %group.name,
                version,
                error = %e,
                "Snapshot inconsistency, refusing to publish"
            );
            return Err(SyncError::Inconsistent {
                node: group.name,
                version,
                source: e,
            });
        }

        let endpoints = snapshot.endpoint_count();
        if cache.set_snapshot(snapshot).await.is_some() {
            info!(node = %group.name, version, endpoints, "Published snapshot");
        } else {
            info!(
                node = %group.name,
                version,
                revision,
                "Group deleted since update, snapshot dropped"
            );
        }
    }

    info!("Update channel closed, update loop stopping");
    Ok(())
}

/// Clears the cached snapshot of every deleted group.
///
/// A snapshot published from a later revision than the deletion belongs to
/// a recreated group and survives.
pub async fn run_delete_loop(cache: SnapshotCache, mut deletes: mpsc::Receiver<GroupDeletion>) {
    info!("Starting snapshot deletion loop");

    while let Some(GroupDeletion { revision, name }) = deletes.recv().await {
        let cleared = cache.clear_snapshot(&name, revision).await;
        info!(node = %name, revision, cleared, "Deleted snapshot for node");
    }

    info!("Delete channel closed, deletion loop stopping");
}

/// Join handles of the two synchronizer loops.
pub struct SyncHandle {
    update_task: JoinHandle<Result<(), SyncError>>,
    delete_task: JoinHandle<()>,
}

impl SyncHandle {
    /// Waits until either loop stops and reports why.
    ///
    /// Loops only stop on an inconsistent snapshot or when the registry
    /// side of their channel is gone; both are fatal for the daemon.
    pub async fn fatal(mut self) -> SyncError {
        let err = tokio::select! {
            result = &mut self.update_task => match result {
                Ok(Ok(())) => SyncError::Stopped("update"),
                Ok(Err(e)) => e,
                Err(e) => SyncError::Panicked { name: "update", reason: e.to_string() },
            },
            result = &mut self.delete_task => match result {
                Ok(()) => SyncError::Stopped("delete"),
                Err(e) => SyncError::Panicked { name: "delete", reason: e.to_string() },
            },
        };

        warn!(error = %err, "Synchronizer stopped");
        self.abort();
        err
    }

    /// Aborts both loops.
    pub fn abort(&self) {
        self.update_task.abort();
        self.delete_task.abort();
    }
}

/// Reasons the synchronizer stopped.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("inconsistent snapshot for {node} at version {version}: {source}")]
    Inconsistent {
        node: GroupName,
        version: u64,
        source: SnapshotError,
    },

    #[error("{0} loop stopped: notification channel closed")]
    Stopped(&'static str),

    #[error("{name} loop panicked: {reason}")]
    Panicked { name: &'static str, reason: String },
}

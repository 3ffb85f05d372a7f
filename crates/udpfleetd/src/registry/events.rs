//! Registry notifications and errors.

use thiserror::Error;
use tokio::sync::mpsc;

use udpfleet_core::{GroupName, GroupState};

/// Position of a mutation in the registry's global order.
///
/// Taken under the registry lock, so revisions are unique and increase in
/// exactly the order mutations were applied, across both channels.
pub type Revision = u64;

/// Value copy of a group after a mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupUpdate {
    pub revision: Revision,
    pub group: GroupState,
}

/// A group that ceased to exist at `revision`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupDeletion {
    pub revision: Revision,
    pub name: GroupName,
}

/// Receiving ends of the registry's notification channels.
///
/// Each channel is consumed by exactly one synchronizer loop.
#[derive(Debug)]
pub struct Notifications {
    /// One entry per add, and per removal that leaves the group alive.
    pub updates: mpsc::Receiver<GroupUpdate>,

    /// One entry per removal that empties a group.
    pub deletes: mpsc::Receiver<GroupDeletion>,
}

/// Errors that can occur during registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The synchronizer stopped consuming notifications.
    ///
    /// The mutation itself was applied before the send failed.
    #[error("{channel} notification channel closed")]
    ChannelClosed {
        /// "update" or "delete"
        channel: &'static str,
    },
}

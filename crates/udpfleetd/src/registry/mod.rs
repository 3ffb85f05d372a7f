//! Fleet state registry.
//!
//! The registry is the authoritative map of proxy group name to group
//! state. Every mutation runs under one exclusive lock and hands a value
//! copy of the affected group to the synchronizer before the lock is
//! released.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌──────────────────┐
//! │ Reconcile layer │────▶│  FleetRegistry  │────▶│   updates (mpsc) │──▶ update loop
//! │ / control conn  │     │  Mutex<HashMap> │     ├──────────────────┤
//! └─────────────────┘     └─────────────────┘────▶│   deletes (mpsc) │──▶ delete loop
//!                                                 └──────────────────┘
//! ```
//!
//! # Backpressure
//!
//! Notifications are sent while the lock is held, so a slow consumer
//! stalls every mutation across all groups. That is what keeps the
//! synchronizer's view in the registry's global mutation order. Channels
//! are bounded and block when full; nothing is ever dropped.
//!
//! Every notification carries the [`Revision`] of the mutation that
//! produced it. The two channels are drained by independent loops, and
//! the revision lets the cache order an update against a deletion of the
//! same group.
//!
//! # Persistence
//!
//! None. After a restart the reconcile layer must replay every live
//! workload before the discovery surface reflects reality again.

use tokio::sync::mpsc;
use tracing::debug;

mod events;
mod fleet;

pub use events::{GroupDeletion, GroupUpdate, Notifications, RegistryError, Revision};
pub use fleet::FleetRegistry;

/// Default capacity of each notification channel.
///
/// One slot is the closest bounded equivalent of a direct hand-off.
pub const DEFAULT_NOTIFY_BUFFER: usize = 1;

/// Create a registry and the receiving ends of its notification channels.
///
/// A `capacity` of zero is treated as one.
///
/// # Example
///
/// ```no_run
/// use udpfleetd::registry;
///
/// let (registry, notifications) = registry::channel(registry::DEFAULT_NOTIFY_BUFFER);
/// // hand `notifications` to the synchronizer, clone `registry` freely
/// # drop((registry, notifications));
/// ```
pub fn channel(capacity: usize) -> (FleetRegistry, Notifications) {
    let capacity = capacity.max(1);
    let (update_tx, update_rx) = mpsc::channel(capacity);
    let (delete_tx, delete_rx) = mpsc::channel(capacity);

    debug!(capacity, "Created registry notification channels");

    (
        FleetRegistry::new(update_tx, delete_tx),
        Notifications {
            updates: update_rx,
            deletes: delete_rx,
        },
    )
}

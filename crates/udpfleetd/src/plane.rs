//! Control-plane wiring.

use tracing::info;

use crate::cache::{CacheReader, SnapshotCache};
use crate::config::DaemonConfig;
use crate::registry::{self, FleetRegistry};
use crate::sync::{spawn_synchronizer, SyncHandle};

/// A running registry, synchronizer and cache.
///
/// Only the synchronizer keeps the cache writer; callers get the
/// registry handle and a read-only cache view.
pub struct ControlPlane {
    pub registry: FleetRegistry,
    pub cache: CacheReader,
    pub sync: SyncHandle,
}

impl ControlPlane {
    /// Starts the synchronizer loops. Must be called within a tokio runtime.
    pub fn start(config: &DaemonConfig) -> Self {
        Self::with_buffer(config.notify_buffer)
    }

    /// Starts with an explicit notification channel capacity.
    pub fn with_buffer(notify_buffer: usize) -> Self {
        let (registry, notifications) = registry::channel(notify_buffer);
        let cache = SnapshotCache::new();
        let reader = cache.reader();
        let sync = spawn_synchronizer(cache, notifications);

        info!(notify_buffer, "Control plane started");

        Self {
            registry,
            cache: reader,
            sync,
        }
    }
}

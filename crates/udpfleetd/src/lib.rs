//! udpfleet daemon - fleet registry, snapshot synchronizer and discovery server
//!
//! This crate provides the control-plane core:
//! - `registry` - authoritative proxy-group state and change notifications
//! - `sync` - versioned snapshot building and publication
//! - `cache` - the process-wide snapshot cache
//! - `server` - TCP discovery server for proxies and the reconcile layer
//! - `config` - daemon configuration
//! - `plane` - wiring of registry, synchronizer and cache
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         udpfleetd                               │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  ┌─────────────────┐  mutate  ┌─────────────────┐               │
//! │  │ DiscoveryServer │─────────▶│  FleetRegistry  │               │
//! │  │     (TCP)       │          │ (Mutex<HashMap>)│               │
//! │  └────────┬────────┘          └────────┬────────┘               │
//! │           │ watch                      │ updates / deletes      │
//! │           │                            ▼                        │
//! │  ┌────────┴────────┐  publish ┌─────────────────┐               │
//! │  │  SnapshotCache  │◀─────────│  Synchronizer   │               │
//! │  │ (watch per node)│          │ (update/delete) │               │
//! │  └─────────────────┘          └─────────────────┘               │
//! │                                                                 │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Flow is one-directional: the synchronizer and the discovery side of the
//! server never call back into the registry.
//!
//! All state lives in process memory. After a restart the reconcile layer
//! must replay every live workload.
//!
//! # Panic-Free Guarantees
//!
//! Production code in this crate does not `.unwrap()`, `.expect()` or
//! `panic!()`. Channel closure surfaces as error variants, and an
//! inconsistent snapshot stops the synchronizer with an error the daemon
//! turns into a non-zero exit.

pub mod cache;
pub mod config;
pub mod plane;
pub mod registry;
pub mod server;
pub mod sync;

pub use cache::{CacheReader, SnapshotCache};
pub use config::{ConfigError, DaemonConfig};
pub use plane::ControlPlane;
pub use registry::{
    FleetRegistry, GroupDeletion, GroupUpdate, Notifications, RegistryError, Revision,
};
pub use server::{ConnectionLimits, DiscoveryServer, ServerError};
pub use sync::{Snapshot, SyncError, SyncHandle};

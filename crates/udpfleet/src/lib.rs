//! udpfleet client library
//!
//! Talks to a running `udpfleetd` over its TCP protocol. The reconcile
//! layer uses it to drive registry operations; operators and tests use it
//! to inspect snapshots and to watch a node's discovery stream.

pub mod client;
pub mod error;

pub use client::FleetClient;
pub use error::{ClientError, Result};

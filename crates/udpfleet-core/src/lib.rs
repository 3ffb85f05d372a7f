//! udpfleet Core - Shared domain types for the UDP proxy control plane
//!
//! This crate provides the types shared between the daemon (udpfleetd),
//! the wire protocol and the client library:
//! - `GroupName` / `WorkloadId` - type-safe identifiers
//! - `Endpoint` - a receiver's UDP address
//! - `GroupState` - value copy of one proxy group (receivers + senders)
//! - `ReceiverAnnotation` - boundary parsing of `group:port` annotations
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod annotation;
pub mod error;
pub mod group;
pub mod id;

// Re-exports for convenience
pub use annotation::{ReceiverAnnotation, RECEIVER_ANNOTATION, SENDER_ANNOTATION};
pub use error::{DomainError, DomainResult};
pub use group::{Endpoint, GroupState};
pub use id::{GroupName, WorkloadId};

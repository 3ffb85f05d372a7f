//! udpfleet Protocol - Wire protocol for the discovery server
//!
//! Newline-delimited JSON messages exchanged between proxies (discovery
//! subscribers), the reconcile layer (control commands) and the daemon.
//!
//! Discovery follows the state-of-the-world model: every response carries
//! the complete resource set for the subscribing node.

pub mod message;
pub mod resource;
pub mod version;

pub use message::{
    ClientMessage, DiscoveryRequest, DiscoveryResponse, ErrorCode, MessageType, Node,
    ServerMessage, SnapshotSummary,
};
pub use resource::{
    Cluster, ClusterLoadAssignment, DiscoveryType, LbEndpoint, LocalityLbEndpoints,
    SocketAddress, TransportProtocol, CLUSTER_TYPE_URL,
};
pub use version::{ProtocolVersion, VersionError};

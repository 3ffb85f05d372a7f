//! Proxy group state: receiver endpoints and sender identities.

use std::collections::{BTreeMap, BTreeSet};
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};
use crate::id::{GroupName, WorkloadId};

// ============================================================================
// Endpoint
// ============================================================================

/// UDP address of a receiver workload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub address: String,
    pub port: u16,
}

impl Endpoint {
    /// Creates an endpoint without validation.
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
        }
    }

    /// Validates a receiver address and port coming from outside the process.
    ///
    /// The address must be an IPv4 or IPv6 literal and the port non-zero.
    pub fn parse(address: &str, port: u16) -> DomainResult<Self> {
        let trimmed = address.trim();
        let ip: IpAddr = trimmed
            .parse()
            .map_err(|_| DomainError::invalid("address", address, "an IP address"))?;
        if port == 0 {
            return Err(DomainError::invalid("port", "0", "a port in 1..=65535"));
        }
        Ok(Self {
            address: ip.to_string(),
            port,
        })
    }
}

// ============================================================================
// Group State
// ============================================================================

/// State of one proxy group.
///
/// The registry owns the live instance; notifications carry value copies so
/// consumers never observe a half-applied mutation. Both collections are
/// ordered by workload identity, which gives snapshot builders a stable
/// endpoint order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupState {
    pub name: GroupName,
    pub receivers: BTreeMap<WorkloadId, Endpoint>,
    pub senders: BTreeSet<WorkloadId>,
}

impl GroupState {
    /// Creates an empty group.
    pub fn new(name: GroupName) -> Self {
        Self {
            name,
            receivers: BTreeMap::new(),
            senders: BTreeSet::new(),
        }
    }

    /// True when the group has neither receivers nor senders and must not
    /// exist in the registry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.receivers.is_empty() && self.senders.is_empty()
    }

    pub fn receiver_count(&self) -> usize {
        self.receivers.len()
    }

    pub fn sender_count(&self) -> usize {
        self.senders.len()
    }

    /// Receiver endpoints in workload-identity order.
    pub fn endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.receivers.values()
    }
}

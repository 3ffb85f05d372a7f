//! Discovery resources served to proxies.
//!
//! Only the cluster resource is modelled. Each proxy group gets one static
//! cluster whose load assignment embeds the group's receiver endpoints
//! inline; there is no separately versioned endpoint resource.

use serde::{Deserialize, Serialize};
use udpfleet_core::Endpoint;

/// Type URL of cluster resources.
pub const CLUSTER_TYPE_URL: &str = "type.googleapis.com/envoy.config.cluster.v3.Cluster";

/// How a cluster's members are discovered by the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscoveryType {
    /// Members are listed inline in the load assignment.
    Static,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransportProtocol {
    Udp,
}

/// A socket address a proxy forwards traffic to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SocketAddress {
    pub protocol: TransportProtocol,
    pub address: String,
    pub port_value: u32,
}

impl SocketAddress {
    pub fn udp(address: impl Into<String>, port: u16) -> Self {
        Self {
            protocol: TransportProtocol::Udp,
            address: address.into(),
            port_value: u32::from(port),
        }
    }
}

impl From<&Endpoint> for SocketAddress {
    fn from(endpoint: &Endpoint) -> Self {
        Self::udp(endpoint.address.clone(), endpoint.port)
    }
}

/// One load-balanced endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LbEndpoint {
    pub address: SocketAddress,
}

/// Endpoints sharing a locality.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalityLbEndpoints {
    pub lb_endpoints: Vec<LbEndpoint>,
}

/// Endpoint assignment for a named cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterLoadAssignment {
    /// Name of the cluster this assignment belongs to.
    pub cluster_name: String,
    pub endpoints: Vec<LocalityLbEndpoints>,
}

impl ClusterLoadAssignment {
    /// Total number of endpoints across all localities.
    pub fn endpoint_count(&self) -> usize {
        self.endpoints.iter().map(|l| l.lb_endpoints.len()).sum()
    }

    /// Iterates over every endpoint address in order.
    pub fn addresses(&self) -> impl Iterator<Item = &SocketAddress> {
        self.endpoints
            .iter()
            .flat_map(|l| l.lb_endpoints.iter().map(|e| &e.address))
    }
}

/// A cluster resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub name: String,
    #[serde(rename = "type")]
    pub discovery_type: DiscoveryType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_assignment: Option<ClusterLoadAssignment>,
}

impl Cluster {
    /// Builds a static cluster whose load assignment lists `endpoints` in
    /// the order given, all in a single locality.
    pub fn udp_static<'a>(
        name: impl Into<String>,
        endpoints: impl IntoIterator<Item = &'a Endpoint>,
    ) -> Self {
        let name = name.into();
        let lb_endpoints = endpoints
            .into_iter()
            .map(|e| LbEndpoint {
                address: SocketAddress::from(e),
            })
            .collect();

        Self {
            load_assignment: Some(ClusterLoadAssignment {
                cluster_name: name.clone(),
                endpoints: vec![LocalityLbEndpoints { lb_endpoints }],
            }),
            name,
            discovery_type: DiscoveryType::Static,
        }
    }

    pub fn endpoint_count(&self) -> usize {
        self.load_assignment
            .as_ref()
            .map_or(0, ClusterLoadAssignment::endpoint_count)
    }
}

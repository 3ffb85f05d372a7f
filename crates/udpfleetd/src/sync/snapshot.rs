//! Versioned resource snapshots.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use thiserror::Error;

use udpfleet_core::{GroupName, GroupState};
use udpfleet_protocol::{Cluster, SnapshotSummary};

use crate::registry::Revision;

/// An immutable, versioned resource set for one proxy group.
///
/// Snapshots replace each other wholesale; there is no delta model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub node: GroupName,
    pub version: u64,
    /// Registry revision of the group copy this snapshot was built from
    pub revision: Revision,
    pub clusters: Vec<Cluster>,
    pub published_at: DateTime<Utc>,
}

impl Snapshot {
    /// Version as sent on the wire.
    pub fn version_info(&self) -> String {
        self.version.to_string()
    }

    /// Total receiver endpoints across all clusters.
    pub fn endpoint_count(&self) -> usize {
        self.clusters.iter().map(Cluster::endpoint_count).sum()
    }

    pub fn summary(&self) -> SnapshotSummary {
        SnapshotSummary {
            node: self.node.clone(),
            version: self.version,
            endpoints: self.endpoint_count(),
            published_at: self.published_at,
        }
    }

    /// Checks that the snapshot can be served as-is.
    ///
    /// Cluster names must be non-empty and unique. Every cluster is static,
    /// so it must carry a load assignment naming the cluster itself.
    pub fn consistent(&self) -> Result<(), SnapshotError> {
        let mut seen = HashSet::new();

        for cluster in &self.clusters {
            if cluster.name.is_empty() {
                return Err(SnapshotError::EmptyClusterName);
            }
            if !seen.insert(cluster.name.as_str()) {
                return Err(SnapshotError::DuplicateCluster(cluster.name.clone()));
            }

            match &cluster.load_assignment {
                Some(assignment) if assignment.cluster_name != cluster.name => {
                    return Err(SnapshotError::UnresolvedAssignment {
                        cluster: cluster.name.clone(),
                        assignment: assignment.cluster_name.clone(),
                    });
                }
                None => {
                    return Err(SnapshotError::MissingAssignment(cluster.name.clone()));
                }
                Some(_) => {}
            }
        }

        Ok(())
    }
}

/// Builds the snapshot for `group` at `version`, tagged with the registry
/// `revision` the group copy was taken at.
///
/// One static cluster named after the group; its load assignment lists
/// every receiver endpoint in workload-identity order.
pub fn build_snapshot(group: &GroupState, version: u64, revision: Revision) -> Snapshot {
    Snapshot {
        node: group.name.clone(),
        version,
        revision,
        clusters: vec![Cluster::udp_static(group.name.as_str(), group.endpoints())],
        published_at: Utc::now(),
    }
}

/// Ways a snapshot can be internally inconsistent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    #[error("cluster with empty name")]
    EmptyClusterName,

    #[error("duplicate cluster name: {0}")]
    DuplicateCluster(String),

    #[error("static cluster {0} has no load assignment")]
    MissingAssignment(String),

    #[error("cluster {cluster} embeds a load assignment for unknown cluster {assignment}")]
    UnresolvedAssignment { cluster: String, assignment: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use udpfleet_core::{Endpoint, WorkloadId};

    fn edge_group() -> GroupState {
        let mut group = GroupState::new(GroupName::new("edge"));
        group
            .receivers
            .insert(WorkloadId::new("pod-2"), Endpoint::new("10.0.0.2", 7000));
        group
            .receivers
            .insert(WorkloadId::new("pod-1"), Endpoint::new("10.0.0.1", 7000));
        group
    }

    #[test]
    fn test_build_snapshot() {
        let snapshot = build_snapshot(&edge_group(), 2, 2);

        assert_eq!(snapshot.node, GroupName::new("edge"));
        assert_eq!(snapshot.version_info(), "2");
        assert_eq!(snapshot.clusters.len(), 1);
        assert_eq!(snapshot.endpoint_count(), 2);
        assert!(snapshot.consistent().is_ok());

        let addresses: Vec<&str> = snapshot.clusters[0]
            .load_assignment
            .as_ref()
            .unwrap()
            .addresses()
            .map(|a| a.address.as_str())
            .collect();
        assert_eq!(addresses, vec!["10.0.0.1", "10.0.0.2"]);
    }

    #[test]
    fn test_sender_only_group_builds_empty_cluster() {
        let mut group = GroupState::new(GroupName::new("edge"));
        group.senders.insert(WorkloadId::new("pod-s1"));

        let snapshot = build_snapshot(&group, 1, 1);
        assert_eq!(snapshot.endpoint_count(), 0);
        assert!(snapshot.consistent().is_ok());
    }

    #[test]
    fn test_duplicate_cluster_is_inconsistent() {
        let mut snapshot = build_snapshot(&edge_group(), 1, 1);
        let copy = snapshot.clusters[0].clone();
        snapshot.clusters.push(copy);

        assert_eq!(
            snapshot.consistent(),
            Err(SnapshotError::DuplicateCluster("edge".to_string()))
        );
    }

    #[test]
    fn test_dangling_assignment_is_inconsistent() {
        let mut snapshot = build_snapshot(&edge_group(), 1, 1);
        if let Some(assignment) = snapshot.clusters[0].load_assignment.as_mut() {
            assignment.cluster_name = "elsewhere".to_string();
        }

        assert!(matches!(
            snapshot.consistent(),
            Err(SnapshotError::UnresolvedAssignment { .. })
        ));
    }

    #[test]
    fn test_static_cluster_without_assignment_is_inconsistent() {
        let mut snapshot = build_snapshot(&edge_group(), 1, 1);
        snapshot.clusters[0].load_assignment = None;

        assert_eq!(
            snapshot.consistent(),
            Err(SnapshotError::MissingAssignment("edge".to_string()))
        );
    }

    #[test]
    fn test_empty_name_is_inconsistent() {
        let snapshot = build_snapshot(&GroupState::new(GroupName::new("")), 1, 1);
        assert_eq!(snapshot.consistent(), Err(SnapshotError::EmptyClusterName));
    }

    #[test]
    fn test_summary() {
        let summary = build_snapshot(&edge_group(), 4, 4).summary();
        assert_eq!(summary.version, 4);
        assert_eq!(summary.endpoints, 2);
    }
}

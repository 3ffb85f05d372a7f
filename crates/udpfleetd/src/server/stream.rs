//! Per-connection discovery stream state.
//!
//! A connection binds to one node on its first discovery request. From
//! then on the stream pushes the node's snapshot whenever its version
//! differs from the last one sent, and classifies incoming requests as
//! ACK, NACK or stale by nonce.

use tokio::sync::watch;

use udpfleet_core::GroupName;
use udpfleet_protocol::{DiscoveryRequest, DiscoveryResponse, CLUSTER_TYPE_URL};

use crate::cache::SnapshotWatch;

/// How a follow-up request relates to what the stream has sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestKind {
    /// Accepts the latest response.
    Ack { version: String },
    /// Rejects the latest response.
    Nack { accepted: String, detail: String },
    /// Answers a response that is no longer the latest; ignored.
    Stale,
}

pub struct DiscoveryStream {
    node: GroupName,
    watch: SnapshotWatch,
    last_sent: Option<u64>,
    nonce: u64,
    last_nonce: Option<String>,
}

impl DiscoveryStream {
    /// `client_version` is the `version_info` of the subscribing request;
    /// a proxy that already holds the current version gets no push.
    pub fn new(node: GroupName, watch: SnapshotWatch, client_version: &str) -> Self {
        Self {
            node,
            watch,
            last_sent: client_version.parse().ok(),
            nonce: 0,
            last_nonce: None,
        }
    }

    pub fn node(&self) -> &GroupName {
        &self.node
    }

    /// Waits for the node's cache slot to change.
    pub async fn changed(&mut self) -> Result<(), watch::error::RecvError> {
        self.watch.changed().await
    }

    /// The response to push, if the cached snapshot has a version this
    /// stream has not sent. A cleared slot yields nothing.
    pub fn next_response(&mut self) -> Option<DiscoveryResponse> {
        let snapshot = self.watch.borrow_and_update().clone()?;
        if self.last_sent == Some(snapshot.version) {
            return None;
        }

        self.nonce += 1;
        let nonce = self.nonce.to_string();
        self.last_sent = Some(snapshot.version);
        self.last_nonce = Some(nonce.clone());

        Some(DiscoveryResponse {
            version_info: snapshot.version_info(),
            resources: snapshot.clusters.clone(),
            type_url: CLUSTER_TYPE_URL.to_string(),
            nonce,
        })
    }

    pub fn classify(&self, request: &DiscoveryRequest) -> RequestKind {
        if self.last_nonce.as_deref() != Some(request.response_nonce.as_str()) {
            return RequestKind::Stale;
        }

        match &request.error_detail {
            Some(detail) => RequestKind::Nack {
                accepted: request.version_info.clone(),
                detail: detail.clone(),
            },
            None => RequestKind::Ack {
                version: request.version_info.clone(),
            },
        }
    }
}

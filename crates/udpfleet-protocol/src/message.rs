//! Protocol message types for daemon communication.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use udpfleet_core::GroupName;

use crate::resource::{Cluster, CLUSTER_TYPE_URL};
use crate::version::ProtocolVersion;

// ============================================================================
// Discovery Stream
// ============================================================================

/// Identity of a subscribing proxy. The id is the proxy group name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
}

/// Subscription request, ACK or NACK sent by a proxy.
///
/// The first request on a connection subscribes; later requests echo the
/// `version_info` and `response_nonce` of the response they acknowledge.
/// A request with `error_detail` set rejects that response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryRequest {
    pub node: Node,
    pub type_url: String,
    /// Version of the last response the proxy accepted ("" initially).
    #[serde(default)]
    pub version_info: String,
    /// Nonce of the response this request answers ("" initially).
    #[serde(default)]
    pub response_nonce: String,
    /// Ignored for clusters: subscriptions are always wildcard.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl DiscoveryRequest {
    /// Initial cluster subscription for `node`.
    pub fn subscribe(node: impl Into<String>) -> Self {
        Self {
            node: Node { id: node.into() },
            type_url: CLUSTER_TYPE_URL.to_string(),
            version_info: String::new(),
            response_nonce: String::new(),
            resource_names: Vec::new(),
            error_detail: None,
        }
    }

    /// Acknowledges `response`.
    pub fn ack(node: impl Into<String>, response: &DiscoveryResponse) -> Self {
        Self {
            version_info: response.version_info.clone(),
            response_nonce: response.nonce.clone(),
            type_url: response.type_url.clone(),
            ..Self::subscribe(node)
        }
    }

    /// Rejects `response`, keeping `accepted_version` as the applied one.
    pub fn nack(
        node: impl Into<String>,
        accepted_version: impl Into<String>,
        response: &DiscoveryResponse,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            version_info: accepted_version.into(),
            response_nonce: response.nonce.clone(),
            type_url: response.type_url.clone(),
            error_detail: Some(detail.into()),
            ..Self::subscribe(node)
        }
    }

    pub fn is_nack(&self) -> bool {
        self.error_detail.is_some()
    }
}

/// Complete resource set for a node at one version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryResponse {
    pub version_info: String,
    pub resources: Vec<Cluster>,
    pub type_url: String,
    pub nonce: String,
}

// ============================================================================
// Client -> Daemon
// ============================================================================

/// Message types that can be sent by clients to the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageType {
    /// Client handshake/connection request
    Connect {
        #[serde(skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
    },

    /// Discovery subscription, ACK or NACK
    DiscoveryRequest(DiscoveryRequest),

    /// Add or update a receiver endpoint
    AddReceiver {
        group: String,
        port: u16,
        address: String,
        workload: String,
    },

    /// Remove a receiver endpoint
    RemoveReceiver { group: String, workload: String },

    /// Register a sender workload
    AddSender { group: String, workload: String },

    /// Unregister a sender workload
    RemoveSender { group: String, workload: String },

    /// Summaries of every published snapshot
    ListSnapshots,

    /// Ping to check connection
    Ping { seq: u64 },

    /// Client disconnecting gracefully
    Disconnect,
}

/// Messages sent from client to daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientMessage {
    pub protocol_version: ProtocolVersion,

    #[serde(flatten)]
    pub message: MessageType,
}

impl ClientMessage {
    /// Wraps `message` with the current protocol version.
    pub fn new(message: MessageType) -> Self {
        Self {
            protocol_version: ProtocolVersion::CURRENT,
            message,
        }
    }

    pub fn connect(client_id: Option<String>) -> Self {
        Self::new(MessageType::Connect { client_id })
    }

    pub fn discovery(request: DiscoveryRequest) -> Self {
        Self::new(MessageType::DiscoveryRequest(request))
    }

    pub fn add_receiver(
        group: impl Into<String>,
        port: u16,
        address: impl Into<String>,
        workload: impl Into<String>,
    ) -> Self {
        Self::new(MessageType::AddReceiver {
            group: group.into(),
            port,
            address: address.into(),
            workload: workload.into(),
        })
    }

    pub fn remove_receiver(group: impl Into<String>, workload: impl Into<String>) -> Self {
        Self::new(MessageType::RemoveReceiver {
            group: group.into(),
            workload: workload.into(),
        })
    }

    pub fn add_sender(group: impl Into<String>, workload: impl Into<String>) -> Self {
        Self::new(MessageType::AddSender {
            group: group.into(),
            workload: workload.into(),
        })
    }

    pub fn remove_sender(group: impl Into<String>, workload: impl Into<String>) -> Self {
        Self::new(MessageType::RemoveSender {
            group: group.into(),
            workload: workload.into(),
        })
    }

    pub fn list_snapshots() -> Self {
        Self::new(MessageType::ListSnapshots)
    }

    pub fn ping(seq: u64) -> Self {
        Self::new(MessageType::Ping { seq })
    }

    pub fn disconnect() -> Self {
        Self::new(MessageType::Disconnect)
    }
}

// ============================================================================
// Daemon -> Client
// ============================================================================

/// Machine-readable error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Control command failed boundary validation
    InvalidInput,
    /// Discovery request for a resource type the server does not serve
    UnsupportedType,
    /// Discovery request names a different node than the stream is bound to
    NodeMismatch,
    TooManySubscribers,
    /// Malformed or out-of-sequence message
    Protocol,
    /// The control plane could not apply the command
    Unavailable,
}

/// Summary of one published snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotSummary {
    pub node: GroupName,
    pub version: u64,
    pub endpoints: usize,
    pub published_at: DateTime<Utc>,
}

/// Messages sent from daemon to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Connection accepted
    Connected {
        protocol_version: ProtocolVersion,
        client_id: String,
    },

    /// Connection rejected (version mismatch, etc.)
    Rejected {
        reason: String,
        protocol_version: ProtocolVersion,
    },

    /// State-of-the-world push for the subscribed node
    DiscoveryResponse(DiscoveryResponse),

    /// Control command applied
    Applied,

    /// Result of a remove_sender command
    SenderRemoved {
        /// True when this removal left the group without senders
        last_sender: bool,
    },

    SnapshotList { snapshots: Vec<SnapshotSummary> },

    Pong { seq: u64 },

    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<ErrorCode>,
    },
}

impl ServerMessage {
    pub fn connected(client_id: String) -> Self {
        Self::Connected {
            protocol_version: ProtocolVersion::CURRENT,
            client_id,
        }
    }

    pub fn rejected(reason: &str) -> Self {
        Self::Rejected {
            reason: reason.to_string(),
            protocol_version: ProtocolVersion::CURRENT,
        }
    }

    pub fn error(message: &str) -> Self {
        Self::Error {
            message: message.to_string(),
            code: None,
        }
    }

    pub fn error_with_code(message: &str, code: ErrorCode) -> Self {
        Self::Error {
            message: message.to_string(),
            code: Some(code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_serialization() {
        let msg = ClientMessage::ping(42);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"ping\""));
        assert!(json.contains("\"seq\":42"));
        assert!(json.contains("\"protocol_version\""));
    }

    #[test]
    fn test_discovery_request_wire_format() {
        let msg = ClientMessage::discovery(DiscoveryRequest::subscribe("edge"));
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();

        assert_eq!(json["type"], "discovery_request");
        assert_eq!(json["node"]["id"], "edge");
        assert_eq!(json["type_url"], CLUSTER_TYPE_URL);
        assert!(json.get("error_detail").is_none());
    }

    #[test]
    fn test_discovery_request_defaults_on_parse() {
        let line = r#"{"protocol_version":{"major":1,"minor":0},"type":"discovery_request","node":{"id":"edge"},"type_url":"x"}"#;
        let parsed: ClientMessage = serde_json::from_str(line).unwrap();

        match parsed.message {
            MessageType::DiscoveryRequest(req) => {
                assert_eq!(req.node.id, "edge");
                assert!(req.version_info.is_empty());
                assert!(req.response_nonce.is_empty());
                assert!(!req.is_nack());
            }
            other => panic!("Expected DiscoveryRequest, got {other:?}"),
        }
    }

    #[test]
    fn test_ack_and_nack_echo_response() {
        let response = DiscoveryResponse {
            version_info: "3".to_string(),
            resources: Vec::new(),
            type_url: CLUSTER_TYPE_URL.to_string(),
            nonce: "7".to_string(),
        };

        let ack = DiscoveryRequest::ack("edge", &response);
        assert_eq!(ack.version_info, "3");
        assert_eq!(ack.response_nonce, "7");
        assert!(!ack.is_nack());

        let nack = DiscoveryRequest::nack("edge", "2", &response, "bad cluster");
        assert_eq!(nack.version_info, "2");
        assert_eq!(nack.response_nonce, "7");
        assert!(nack.is_nack());
    }

    #[test]
    fn test_add_receiver_roundtrip() {
        let original = ClientMessage::add_receiver("edge", 7000, "10.0.0.1", "pod-1");
        let json = serde_json::to_string(&original).unwrap();
        let parsed: ClientMessage = serde_json::from_str(&json).unwrap();

        match parsed.message {
            MessageType::AddReceiver {
                group,
                port,
                address,
                workload,
            } => {
                assert_eq!(group, "edge");
                assert_eq!(port, 7000);
                assert_eq!(address, "10.0.0.1");
                assert_eq!(workload, "pod-1");
            }
            other => panic!("Expected AddReceiver, got {other:?}"),
        }
    }

    #[test]
    fn test_out_of_range_port_is_rejected() {
        let line = r#"{"protocol_version":{"major":1,"minor":0},"type":"add_receiver","group":"edge","port":70000,"address":"10.0.0.1","workload":"pod-1"}"#;
        assert!(serde_json::from_str::<ClientMessage>(line).is_err());
    }

    #[test]
    fn test_server_message_serialization() {
        let json = serde_json::to_string(&ServerMessage::Applied).unwrap();
        assert_eq!(json, r#"{"type":"applied"}"#);

        let json = serde_json::to_string(&ServerMessage::SenderRemoved { last_sender: true }).unwrap();
        assert!(json.contains("\"last_sender\":true"));

        let err = ServerMessage::error_with_code("nope", ErrorCode::UnsupportedType);
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"code\":\"unsupported_type\""));
    }

    #[test]
    fn test_discovery_response_roundtrip_through_server_message() {
        let msg = ServerMessage::DiscoveryResponse(DiscoveryResponse {
            version_info: "1".to_string(),
            resources: Vec::new(),
            type_url: CLUSTER_TYPE_URL.to_string(),
            nonce: "1".to_string(),
        });
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"discovery_response\""));

        let parsed: ServerMessage = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed, ServerMessage::DiscoveryResponse(r) if r.version_info == "1"));
    }
}

//! Connection client for the udpfleet daemon.
//!
//! `FleetClient` owns one TCP connection. It performs the handshake,
//! issues control commands and can hold one discovery subscription.
//! Pushed discovery responses that arrive while a command is waiting for
//! its reply are queued and handed out by [`FleetClient::next_response`].
//!
//! **Panic-Free Policy:** No `.unwrap()`, `.expect()`, `panic!()`,
//! `unreachable!()`, or `todo!()`.

use std::collections::VecDeque;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::{debug, info};

use udpfleet_protocol::{
    ClientMessage, DiscoveryRequest, DiscoveryResponse, ProtocolVersion, ServerMessage,
    SnapshotSummary,
};

use crate::error::{ClientError, Result};

/// Default daemon address for local use.
pub const DEFAULT_SERVER: &str = "127.0.0.1:18000";

/// Default limit on one server message, newline excluded.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Client for the udpfleet discovery and control server.
///
/// # Example
///
/// ```rust,ignore
/// use udpfleet_client::FleetClient;
///
/// let mut client = FleetClient::connect("127.0.0.1:18000", None).await?;
/// client.add_receiver("edge", 7000, "10.0.0.1", "pod-1").await?;
///
/// client.subscribe("edge").await?;
/// let response = client.next_response().await?;
/// client.ack(&response).await?;
/// ```
pub struct FleetClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
    client_id: String,

    /// Node of the discovery subscription, once subscribed
    node: Option<String>,

    /// Last version this client acknowledged
    accepted_version: String,

    /// Pushes received while waiting for a command reply
    pending: VecDeque<DiscoveryResponse>,

    max_message_size: usize,
}

impl FleetClient {
    /// Connects and performs the handshake.
    pub async fn connect<A: ToSocketAddrs>(addr: A, client_id: Option<String>) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();

        let mut client = Self {
            reader: BufReader::new(reader),
            writer,
            client_id: String::new(),
            node: None,
            accepted_version: String::new(),
            pending: VecDeque::new(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        };

        client.send(&ClientMessage::connect(client_id)).await?;
        match client.recv().await? {
            ServerMessage::Connected {
                protocol_version,
                client_id,
            } => {
                ProtocolVersion::CURRENT
                    .check(&protocol_version)
                    .map_err(|e| ClientError::Rejected(e.to_string()))?;
                info!(client_id = %client_id, protocol_version = %protocol_version, "Handshake complete");
                client.client_id = client_id;
                Ok(client)
            }
            ServerMessage::Rejected { reason, .. } => Err(ClientError::Rejected(reason)),
            ServerMessage::Error { message, code } => Err(ClientError::Server { message, code }),
            other => Err(ClientError::Protocol(format!(
                "Unexpected response to connect: {other:?}"
            ))),
        }
    }

    /// Identifier the server assigned to this connection.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Caps the size of a single server message. A longer line fails with
    /// [`ClientError::MessageTooLarge`] and leaves the connection unusable.
    pub fn set_max_message_size(&mut self, max: usize) {
        self.max_message_size = max;
    }

    // ========================================================================
    // Control commands
    // ========================================================================

    pub async fn add_receiver(
        &mut self,
        group: &str,
        port: u16,
        address: &str,
        workload: &str,
    ) -> Result<()> {
        let reply = self
            .request(ClientMessage::add_receiver(group, port, address, workload))
            .await?;
        expect_applied(reply)
    }

    pub async fn remove_receiver(&mut self, group: &str, workload: &str) -> Result<()> {
        let reply = self
            .request(ClientMessage::remove_receiver(group, workload))
            .await?;
        expect_applied(reply)
    }

    pub async fn add_sender(&mut self, group: &str, workload: &str) -> Result<()> {
        let reply = self.request(ClientMessage::add_sender(group, workload)).await?;
        expect_applied(reply)
    }

    /// Returns `true` if this removal left the group without senders.
    pub async fn remove_sender(&mut self, group: &str, workload: &str) -> Result<bool> {
        match self
            .request(ClientMessage::remove_sender(group, workload))
            .await?
        {
            ServerMessage::SenderRemoved { last_sender } => Ok(last_sender),
            other => Err(unexpected("remove_sender", &other)),
        }
    }

    pub async fn list_snapshots(&mut self) -> Result<Vec<SnapshotSummary>> {
        match self.request(ClientMessage::list_snapshots()).await? {
            ServerMessage::SnapshotList { snapshots } => Ok(snapshots),
            other => Err(unexpected("list_snapshots", &other)),
        }
    }

    /// Round-trips a ping and returns the echoed sequence number.
    pub async fn ping(&mut self, seq: u64) -> Result<u64> {
        match self.request(ClientMessage::ping(seq)).await? {
            ServerMessage::Pong { seq } => Ok(seq),
            other => Err(unexpected("ping", &other)),
        }
    }

    /// Ends the session.
    pub async fn disconnect(mut self) -> Result<()> {
        self.send(&ClientMessage::disconnect()).await
    }

    // ========================================================================
    // Discovery stream
    // ========================================================================

    /// Subscribes this connection to `node`'s clusters.
    pub async fn subscribe(&mut self, node: &str) -> Result<()> {
        if let Some(bound) = &self.node {
            return Err(ClientError::Protocol(format!(
                "already subscribed to {bound}"
            )));
        }

        self.send(&ClientMessage::discovery(DiscoveryRequest::subscribe(node)))
            .await?;
        self.node = Some(node.to_string());
        debug!(node, "Subscribed");
        Ok(())
    }

    /// Waits for the next pushed response.
    pub async fn next_response(&mut self) -> Result<DiscoveryResponse> {
        if let Some(response) = self.pending.pop_front() {
            return Ok(response);
        }

        match self.recv().await? {
            ServerMessage::DiscoveryResponse(response) => Ok(response),
            ServerMessage::Error { message, code } => Err(ClientError::Server { message, code }),
            other => Err(unexpected("discovery stream", &other)),
        }
    }

    /// Accepts `response`.
    pub async fn ack(&mut self, response: &DiscoveryResponse) -> Result<()> {
        let node = self.subscribed_node()?;
        let request = DiscoveryRequest::ack(node, response);
        self.send(&ClientMessage::discovery(request)).await?;
        self.accepted_version = response.version_info.clone();
        Ok(())
    }

    /// Rejects `response`, reporting the last accepted version.
    pub async fn nack(&mut self, response: &DiscoveryResponse, detail: &str) -> Result<()> {
        let node = self.subscribed_node()?;
        let request = DiscoveryRequest::nack(node, self.accepted_version.as_str(), response, detail);
        self.send(&ClientMessage::discovery(request)).await
    }

    fn subscribed_node(&self) -> Result<String> {
        self.node
            .clone()
            .ok_or_else(|| ClientError::Protocol("not subscribed".to_string()))
    }

    // ========================================================================
    // Transport
    // ========================================================================

    /// Sends `message` and returns the first reply that is not a push.
    async fn request(&mut self, message: ClientMessage) -> Result<ServerMessage> {
        self.send(&message).await?;

        loop {
            match self.recv().await? {
                ServerMessage::DiscoveryResponse(response) => self.pending.push_back(response),
                ServerMessage::Error { message, code } => {
                    return Err(ClientError::Server { message, code })
                }
                reply => return Ok(reply),
            }
        }
    }

    async fn send(&mut self, message: &ClientMessage) -> Result<()> {
        let json = serde_json::to_string(message)?;
        self.writer.write_all(json.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        self.writer.flush().await?;
        debug!(message_type = ?message.message, "Sent message to daemon");
        Ok(())
    }

    async fn recv(&mut self) -> Result<ServerMessage> {
        let mut line = Vec::new();
        let limit = self.max_message_size as u64 + 1;
        let read = (&mut self.reader)
            .take(limit)
            .read_until(b'\n', &mut line)
            .await?;

        if read == 0 {
            return Err(ClientError::Closed);
        }
        if line.last() != Some(&b'\n') {
            if line.len() > self.max_message_size {
                return Err(ClientError::MessageTooLarge {
                    size: line.len(),
                    max: self.max_message_size,
                });
            }
            return Err(ClientError::Closed);
        }

        Ok(serde_json::from_slice(&line)?)
    }
}

fn expect_applied(reply: ServerMessage) -> Result<()> {
    match reply {
        ServerMessage::Applied => Ok(()),
        other => Err(unexpected("command", &other)),
    }
}

fn unexpected(context: &str, message: &ServerMessage) -> ClientError {
    ClientError::Protocol(format!("Unexpected reply to {context}: {message:?}"))
}

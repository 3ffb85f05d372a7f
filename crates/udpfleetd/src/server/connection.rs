//! Connection handler for individual client connections.
//!
//! Each TCP connection gets its own `ConnectionHandler` that:
//! - Performs protocol version negotiation
//! - Parses newline-delimited JSON messages
//! - Routes control commands to the registry after boundary validation
//! - Serves one state-of-the-world discovery stream once subscribed
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?`, pattern matching, or `unwrap_or`
//! - Recoverable errors are answered with an `error` message; I/O errors
//!   end the connection

use std::collections::HashMap;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::RwLock;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use udpfleet_core::{DomainError, Endpoint, GroupName, WorkloadId};
use udpfleet_protocol::{
    ClientMessage, DiscoveryRequest, ErrorCode, MessageType, ProtocolVersion, ServerMessage,
    CLUSTER_TYPE_URL,
};

use super::stream::{DiscoveryStream, RequestKind};
use super::ConnectionLimits;
use crate::cache::CacheReader;
use crate::registry::{FleetRegistry, RegistryError};

/// A connection bound to a discovery stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscriber {
    pub client_id: String,
    pub node: GroupName,
}

/// Active discovery subscribers, keyed by connection number.
pub type SubscribersMap = Arc<RwLock<HashMap<u64, Subscriber>>>;

/// Line reader that survives being cancelled mid-line.
///
/// Partially read bytes stay in `line` until the newline arrives, so the
/// read future can sit in a `select!` next to snapshot notifications.
struct MessageReader {
    inner: BufReader<OwnedReadHalf>,
    line: Vec<u8>,
    max_size: usize,
}

impl MessageReader {
    fn new(reader: OwnedReadHalf, max_size: usize) -> Self {
        Self {
            inner: BufReader::new(reader),
            line: Vec::new(),
            max_size,
        }
    }

    async fn next(&mut self) -> Result<ClientMessage, ConnectionError> {
        let limit = (self.max_size + 1).saturating_sub(self.line.len()) as u64;
        let read = (&mut self.inner)
            .take(limit)
            .read_until(b'\n', &mut self.line)
            .await
            .map_err(|e| ConnectionError::Io(e.to_string()))?;

        if self.line.last() != Some(&b'\n') {
            if self.line.len() > self.max_size {
                let size = self.line.len();
                self.line.clear();
                return Err(ConnectionError::MessageTooLarge {
                    size,
                    max: self.max_size,
                });
            }
            // No newline and under the limit: the peer closed the stream.
            debug!(pending = self.line.len(), read, "End of stream");
            return Err(ConnectionError::Eof);
        }

        let line = std::mem::take(&mut self.line);
        serde_json::from_slice(&line).map_err(|e| ConnectionError::ParseError(e.to_string()))
    }
}

/// What woke the message loop.
enum Event {
    Message(Result<ClientMessage, ConnectionError>),
    SnapshotChanged { open: bool },
}

/// Connection handler for a single client.
///
/// Manages the lifecycle of a client connection including:
/// - Protocol handshake
/// - Control command processing
/// - The discovery stream (for proxies)
/// - Shutdown via cancellation
pub struct ConnectionHandler {
    reader: MessageReader,
    writer: BufWriter<OwnedWriteHalf>,
    registry: FleetRegistry,
    cache: CacheReader,
    subscribers: SubscribersMap,
    limits: ConnectionLimits,
    cancel_token: CancellationToken,

    /// Assigned after handshake
    client_id: Option<String>,

    /// Set by the first discovery request
    stream: Option<DiscoveryStream>,

    connection_number: u64,
}

impl ConnectionHandler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        reader: OwnedReadHalf,
        writer: OwnedWriteHalf,
        registry: FleetRegistry,
        cache: CacheReader,
        subscribers: SubscribersMap,
        limits: ConnectionLimits,
        cancel_token: CancellationToken,
        connection_number: u64,
    ) -> Self {
        Self {
            reader: MessageReader::new(reader, limits.max_message_size),
            writer: BufWriter::new(writer),
            registry,
            cache,
            subscribers,
            limits,
            cancel_token,
            client_id: None,
            stream: None,
            connection_number,
        }
    }

    /// Runs the connection handler until the connection closes.
    pub async fn run(mut self) {
        debug!(connection = self.connection_number, "New client connected");

        match timeout(self.limits.handshake_timeout, self.handle_handshake()).await {
            Ok(Ok(())) => {
                info!(client_id = ?self.client_id, "Client handshake completed");
            }
            Ok(Err(e)) => {
                warn!(connection = self.connection_number, error = %e, "Handshake failed");
                return;
            }
            Err(_) => {
                warn!(
                    connection = self.connection_number,
                    error = %ConnectionError::HandshakeTimeout,
                    "Handshake failed"
                );
                return;
            }
        }

        match self.process_messages().await {
            Ok(()) | Err(ConnectionError::Eof) => {}
            Err(e) => {
                warn!(client_id = ?self.client_id, error = %e, "Connection dropped");
            }
        }

        info!(client_id = ?self.client_id, "Client disconnected");
    }

    /// Expects a `Connect` message and answers `Connected` or `Rejected`.
    async fn handle_handshake(&mut self) -> Result<(), ConnectionError> {
        let msg = match self.reader.next().await {
            Ok(msg) => msg,
            Err(e @ ConnectionError::ParseError(_)) => {
                self.send_message(&ServerMessage::error_with_code(
                    &e.to_string(),
                    ErrorCode::Protocol,
                ))
                .await?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let client_version = msg.protocol_version;
        if let Err(e) = ProtocolVersion::CURRENT.check(&client_version) {
            warn!(
                client_version = %client_version,
                server_version = %ProtocolVersion::CURRENT,
                "Protocol version mismatch"
            );

            self.send_message(&ServerMessage::rejected(&e.to_string())).await?;

            return Err(ConnectionError::VersionMismatch {
                client: client_version,
                server: ProtocolVersion::CURRENT,
            });
        }

        match msg.message {
            MessageType::Connect { client_id } => {
                let assigned_id =
                    client_id.unwrap_or_else(|| format!("client-{}", self.connection_number));
                self.client_id = Some(assigned_id.clone());
                self.send_message(&ServerMessage::connected(assigned_id)).await
            }
            other => {
                self.send_message(&ServerMessage::error_with_code(
                    "Expected Connect message for handshake",
                    ErrorCode::Protocol,
                ))
                .await?;

                Err(ConnectionError::UnexpectedMessage(format!("{other:?}")))
            }
        }
    }

    /// Main loop: client messages and snapshot changes, until the peer
    /// leaves, an I/O error occurs or the server shuts down.
    async fn process_messages(&mut self) -> Result<(), ConnectionError> {
        loop {
            let event = tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    debug!(client_id = ?self.client_id, "Connection cancelled by shutdown");
                    return Ok(());
                }
                msg = self.reader.next() => Event::Message(msg),
                open = stream_changed(&mut self.stream) => Event::SnapshotChanged { open },
            };

            let result = match event {
                Event::Message(Ok(msg)) => self.handle_message(msg).await,
                Event::Message(Err(e)) => Err(e),
                Event::SnapshotChanged { open: true } => self.push_snapshot().await,
                Event::SnapshotChanged { open: false } => Err(ConnectionError::CacheClosed),
            };

            let Err(e) = result else { continue };
            if e.is_fatal() {
                return Err(e);
            }

            debug!(client_id = ?self.client_id, error = %e, "Request failed");
            self.send_message(&ServerMessage::error_with_code(&e.to_string(), e.code()))
                .await?;
        }
    }

    async fn handle_message(&mut self, msg: ClientMessage) -> Result<(), ConnectionError> {
        if !msg.protocol_version.is_compatible_with(&ProtocolVersion::CURRENT) {
            return Err(ConnectionError::VersionMismatch {
                client: msg.protocol_version,
                server: ProtocolVersion::CURRENT,
            });
        }

        match msg.message {
            MessageType::Connect { .. } => {
                return Err(ConnectionError::UnexpectedMessage(
                    "Already connected".to_string(),
                ));
            }

            MessageType::DiscoveryRequest(request) => {
                self.handle_discovery(request).await?;
            }

            MessageType::AddReceiver {
                group,
                port,
                address,
                workload,
            } => {
                let group = GroupName::parse(&group)?;
                let endpoint = Endpoint::parse(&address, port)?;
                let workload = WorkloadId::parse(&workload)?;

                self.registry
                    .add_receiver(group, endpoint.port, endpoint.address, workload)
                    .await?;
                self.send_message(&ServerMessage::Applied).await?;
            }

            MessageType::RemoveReceiver { group, workload } => {
                let group = GroupName::parse(&group)?;
                let workload = WorkloadId::parse(&workload)?;

                self.registry.remove_receiver(group, workload).await?;
                self.send_message(&ServerMessage::Applied).await?;
            }

            MessageType::AddSender { group, workload } => {
                let group = GroupName::parse(&group)?;
                let workload = WorkloadId::parse(&workload)?;

                self.registry.add_sender(group, workload).await?;
                self.send_message(&ServerMessage::Applied).await?;
            }

            MessageType::RemoveSender { group, workload } => {
                let group = GroupName::parse(&group)?;
                let workload = WorkloadId::parse(&workload)?;

                let last_sender = self.registry.remove_sender(group, workload).await?;
                self.send_message(&ServerMessage::SenderRemoved { last_sender })
                    .await?;
            }

            MessageType::ListSnapshots => {
                let snapshots = self
                    .cache
                    .snapshots()
                    .await
                    .iter()
                    .map(|snapshot| snapshot.summary())
                    .collect();
                self.send_message(&ServerMessage::SnapshotList { snapshots })
                    .await?;
            }

            MessageType::Ping { seq } => {
                self.send_message(&ServerMessage::Pong { seq }).await?;
            }

            MessageType::Disconnect => {
                debug!(client_id = ?self.client_id, "Client requested disconnect");
                return Err(ConnectionError::Eof);
            }
        }

        Ok(())
    }

    /// Subscribes on the first request; classifies follow-ups as ACK,
    /// NACK or stale.
    async fn handle_discovery(&mut self, request: DiscoveryRequest) -> Result<(), ConnectionError> {
        if request.type_url != CLUSTER_TYPE_URL {
            return Err(ConnectionError::UnsupportedType(request.type_url));
        }

        let Some(stream) = &self.stream else {
            return self.subscribe(request).await;
        };

        if stream.node().as_str() != request.node.id {
            return Err(ConnectionError::NodeMismatch {
                bound: stream.node().to_string(),
                requested: request.node.id,
            });
        }

        match stream.classify(&request) {
            RequestKind::Ack { version } => {
                debug!(node = %stream.node(), version = %version, "Proxy acknowledged configuration");
            }
            RequestKind::Nack { accepted, detail } => {
                warn!(
                    node = %stream.node(),
                    accepted = %accepted,
                    nonce = %request.response_nonce,
                    detail = %detail,
                    "Proxy rejected configuration"
                );
            }
            RequestKind::Stale => {
                debug!(
                    node = %stream.node(),
                    nonce = %request.response_nonce,
                    "Ignoring stale discovery request"
                );
            }
        }

        Ok(())
    }

    async fn subscribe(&mut self, request: DiscoveryRequest) -> Result<(), ConnectionError> {
        let node = GroupName::parse(&request.node.id)?;

        {
            let mut subs = self.subscribers.write().await;
            if subs.len() >= self.limits.max_subscribers {
                return Err(ConnectionError::TooManySubscribers {
                    max: self.limits.max_subscribers,
                });
            }
            subs.insert(
                self.connection_number,
                Subscriber {
                    client_id: self.client_id.clone().unwrap_or_default(),
                    node: node.clone(),
                },
            );
        }

        let watch = self.cache.watch(&node).await;
        info!(
            client_id = ?self.client_id,
            node = %node,
            version = %request.version_info,
            "Proxy subscribed"
        );

        self.stream = Some(DiscoveryStream::new(node, watch, &request.version_info));
        self.push_snapshot().await
    }

    /// Sends the node's snapshot if it is one this stream has not sent.
    async fn push_snapshot(&mut self) -> Result<(), ConnectionError> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(());
        };
        let node = stream.node().clone();

        let Some(response) = stream.next_response() else {
            debug!(node = %node, "No new snapshot to push");
            return Ok(());
        };

        debug!(
            node = %node,
            version = %response.version_info,
            nonce = %response.nonce,
            "Pushing snapshot"
        );
        self.send_message(&ServerMessage::DiscoveryResponse(response))
            .await
    }

    async fn send_message(&mut self, msg: &ServerMessage) -> Result<(), ConnectionError> {
        let json =
            serde_json::to_string(msg).map_err(|e| ConnectionError::ParseError(e.to_string()))?;

        let writer = &mut self.writer;
        match timeout(self.limits.write_timeout, async {
            writer.write_all(json.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
            Ok::<(), std::io::Error>(())
        })
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ConnectionError::Io(e.to_string())),
            Err(_) => Err(ConnectionError::WriteTimeout),
        }
    }
}

/// Resolves when the bound node's cache slot changes; never resolves
/// before the connection subscribes. `false` means the cache is gone.
async fn stream_changed(stream: &mut Option<DiscoveryStream>) -> bool {
    match stream {
        Some(stream) => stream.changed().await.is_ok(),
        None => std::future::pending().await,
    }
}

/// Errors that can occur during connection handling.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Protocol version mismatch: client {client}, server {server}")]
    VersionMismatch {
        client: ProtocolVersion,
        server: ProtocolVersion,
    },

    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("{0}")]
    InvalidInput(#[from] DomainError),

    #[error("Unsupported resource type: {0}")]
    UnsupportedType(String),

    #[error("Stream is bound to node {bound}, request names {requested}")]
    NodeMismatch { bound: String, requested: String },

    #[error("Too many subscribers (max: {max})")]
    TooManySubscribers { max: usize },

    #[error("Registry unavailable: {0}")]
    Registry(#[from] RegistryError),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Connection closed")]
    Eof,

    #[error("Handshake timeout")]
    HandshakeTimeout,

    #[error("Write timeout")]
    WriteTimeout,

    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Snapshot cache closed")]
    CacheClosed,
}

impl ConnectionError {
    /// Whether the connection cannot continue after this error.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::Eof
                | Self::HandshakeTimeout
                | Self::WriteTimeout
                | Self::MessageTooLarge { .. }
                | Self::CacheClosed
        )
    }

    /// Error code reported to the client.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidInput(_) => ErrorCode::InvalidInput,
            Self::UnsupportedType(_) => ErrorCode::UnsupportedType,
            Self::NodeMismatch { .. } => ErrorCode::NodeMismatch,
            Self::TooManySubscribers { .. } => ErrorCode::TooManySubscribers,
            Self::Registry(_) => ErrorCode::Unavailable,
            _ => ErrorCode::Protocol,
        }
    }
}

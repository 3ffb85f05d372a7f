//! TCP discovery server for the udpfleet daemon.
//!
//! The server:
//! - Listens on a TCP port for proxies and for the reconcile layer
//! - Spawns a ConnectionHandler for each client
//! - Tracks discovery subscribers and enforces the subscriber limit
//! - Supports graceful shutdown via CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │ DiscoveryServer │
//! │                 │
//! │   TcpListener   │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐ control ┌─────────────────┐
//! │ConnectionHandler│────────▶│  FleetRegistry  │
//! │   (per client)  │         └─────────────────┘
//! └───────┬─────────┘
//!         │ watch(node)
//!         ▼
//! ┌─────────────────┐
//! │   CacheReader   │
//! └─────────────────┘
//! ```
//!
//! The server only reads the snapshot cache; publication is the
//! synchronizer's job.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Accept errors are logged and the server keeps accepting

mod connection;
mod stream;

pub use connection::{ConnectionError, ConnectionHandler, Subscriber, SubscribersMap};
pub use stream::{DiscoveryStream, RequestKind};

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::cache::CacheReader;
use crate::config::DaemonConfig;
use crate::registry::FleetRegistry;

/// Per-connection limits and timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionLimits {
    pub max_subscribers: usize,
    pub max_message_size: usize,
    pub handshake_timeout: Duration,
    pub write_timeout: Duration,
}

impl From<&DaemonConfig> for ConnectionLimits {
    fn from(config: &DaemonConfig) -> Self {
        Self {
            max_subscribers: config.max_subscribers,
            max_message_size: config.max_message_size,
            handshake_timeout: config.handshake_timeout(),
            write_timeout: config.write_timeout(),
        }
    }
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self::from(&DaemonConfig::default())
    }
}

/// TCP discovery server.
pub struct DiscoveryServer {
    listener: TcpListener,

    registry: FleetRegistry,

    /// Read-only view of published snapshots
    cache: CacheReader,

    limits: ConnectionLimits,

    /// Cancellation token for graceful shutdown
    cancel_token: CancellationToken,

    /// Connection counter for generating client IDs
    connection_counter: AtomicU64,

    /// Connections bound to a discovery stream
    subscribers: SubscribersMap,
}

impl DiscoveryServer {
    /// Binds the listener. Port 0 picks an ephemeral port; see
    /// [`DiscoveryServer::local_addr`].
    pub async fn bind(
        addr: SocketAddr,
        registry: FleetRegistry,
        cache: CacheReader,
        limits: ConnectionLimits,
        cancel_token: CancellationToken,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr,
                error: e.to_string(),
            })?;

        Ok(Self {
            listener,
            registry,
            cache,
            limits,
            cancel_token,
            connection_counter: AtomicU64::new(0),
            subscribers: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener
            .local_addr()
            .map_err(|e| ServerError::LocalAddr(e.to_string()))
    }

    /// Accepts connections until the cancellation token is triggered.
    pub async fn run(&self) -> Result<(), ServerError> {
        let addr = self.local_addr()?;
        info!(
            addr = %addr,
            max_subscribers = self.limits.max_subscribers,
            "Discovery server listening"
        );

        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Server shutdown requested");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let conn_num = self.connection_counter.fetch_add(1, Ordering::Relaxed);
                            debug!(peer = %peer, connection = conn_num, "Accepted connection");
                            self.handle_connection(stream, conn_num);
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }

        self.cleanup().await;
        Ok(())
    }

    fn handle_connection(&self, stream: TcpStream, connection_number: u64) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(connection = connection_number, error = %e, "Failed to set TCP_NODELAY");
        }

        let (reader, writer) = stream.into_split();
        let handler = ConnectionHandler::new(
            reader,
            writer,
            self.registry.clone(),
            self.cache.clone(),
            Arc::clone(&self.subscribers),
            self.limits,
            self.cancel_token.child_token(),
            connection_number,
        );
        let subscribers = Arc::clone(&self.subscribers);
        let cache = self.cache.clone();

        tokio::spawn(async move {
            handler.run().await;

            let removed = subscribers.write().await.remove(&connection_number);
            if let Some(sub) = removed {
                debug!(client_id = %sub.client_id, node = %sub.node, "Removed disconnected subscriber");
                // The handler and its watch receiver are gone by now.
                cache.release(&sub.node).await;
            }
        });
    }

    /// Returns the number of active discovery subscribers.
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    async fn cleanup(&self) {
        self.subscribers.write().await.clear();
        info!("Server cleanup complete");
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind discovery server on {addr}: {error}")]
    Bind { addr: SocketAddr, error: String },

    #[error("Failed to read listener address: {0}")]
    LocalAddr(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limits_from_config() {
        let config = DaemonConfig {
            max_subscribers: 8,
            handshake_timeout_secs: 3,
            ..Default::default()
        };
        let limits = ConnectionLimits::from(&config);
        assert_eq!(limits.max_subscribers, 8);
        assert_eq!(limits.max_message_size, 1_048_576);
        assert_eq!(limits.handshake_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_server_error_display() {
        let err = ServerError::Bind {
            addr: "127.0.0.1:18000".parse().unwrap(),
            error: "address in use".to_string(),
        };
        assert!(err.to_string().contains("127.0.0.1:18000"));
        assert!(err.to_string().contains("address in use"));
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let (registry, _notifications) = crate::registry::channel(1);
        let cache = crate::cache::SnapshotCache::new();
        let server = DiscoveryServer::bind(
            "127.0.0.1:0".parse().unwrap(),
            registry,
            cache.reader(),
            ConnectionLimits::default(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_ne!(server.local_addr().unwrap().port(), 0);
        assert_eq!(server.subscriber_count().await, 0);
    }
}

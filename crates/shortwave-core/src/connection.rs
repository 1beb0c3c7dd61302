//! Connection identity and the send half handed to topics.

use shortwave_protocol::ServerMessage;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::sync::mpsc;

/// Counter distinguishing connections accepted within the same nanosecond.
static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Create a new connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh connection ID.
    #[must_use]
    pub fn generate() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let counter = CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("conn_{timestamp:x}_{counter:x}"))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A send to a single connection failed because its peer is gone.
#[derive(Debug, Error)]
#[error("connection {0} is closed")]
pub struct DeliveryError(pub ConnectionId);

/// The send half of one viewer's connection.
///
/// Topics hold these to fan entries out. A send is a queue push and never
/// blocks; a closed peer surfaces as a [`DeliveryError`] the topic logs and
/// skips.
#[derive(Debug, Clone)]
pub struct SubscriberHandle {
    id: ConnectionId,
    outbound: mpsc::UnboundedSender<ServerMessage>,
}

impl SubscriberHandle {
    /// Create a handle from a connection's id and outbound queue.
    #[must_use]
    pub fn new(id: ConnectionId, outbound: mpsc::UnboundedSender<ServerMessage>) -> Self {
        Self { id, outbound }
    }

    /// Get the connection's id.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Queue a message for delivery to the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection's receive half is gone.
    pub fn send(&self, message: ServerMessage) -> Result<(), DeliveryError> {
        self.outbound
            .send(message)
            .map_err(|_| DeliveryError(self.id.clone()))
    }

    /// Check if the connection has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

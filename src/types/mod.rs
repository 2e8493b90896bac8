//! Errors, events and handler types shared by the hub and the endpoint.

use std::{fmt::Display, net::SocketAddr, sync::Arc};

use futures::future::BoxFuture;
use thiserror::Error;

use crate::conn::{ConnId, ConnState};

/// Boxed error produced by an injected codec.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised by framing, transport and hub operations.
#[derive(Debug, Error)]
pub enum HubError {
    /// A frame declared a negative length, a length above the configured
    /// maximum, or a payload was too large to describe with an `i32` prefix.
    #[error("protocol violation: invalid message length {length}")]
    ProtocolViolation {
        /// The offending length.
        length: i64,
    },

    /// The peer closed the stream.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// Any other socket read or write failure.
    #[error("transport failure: {0}")]
    Transport(#[from] std::io::Error),

    /// The injected encoder or decoder failed.
    #[error("encoding failure: {0}")]
    Encoding(#[source] BoxError),

    /// The hub could not bind its listener.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address the hub tried to bind.
        addr: SocketAddr,
        /// Underlying bind error.
        #[source]
        source: std::io::Error,
    },

    /// `start` or `connect` was called on an already open hub or endpoint.
    #[error("already started")]
    AlreadyStarted,

    /// The endpoint has no connection to send on.
    #[error("endpoint is not connected")]
    NotConnected,

    /// A connection queued more undrained messages than allowed.
    #[error("inbound backlog exceeded {limit} messages")]
    BacklogExceeded {
        /// Configured per-connection limit.
        limit: usize,
    },
}

impl HubError {
    pub(crate) fn encoding<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        HubError::Encoding(err.into())
    }
}

/// Result type alias using [`HubError`].
pub type Result<T> = std::result::Result<T, HubError>;

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Orderly close: the peer's side of the stream reached end of file.
    Peer,
    /// Closed by this process (`disconnect`, `shutdown`).
    Local,
    /// Read error, write error, protocol violation or backlog overflow.
    Failed(String),
}

impl CloseReason {
    /// Terminal state matching this reason.
    pub fn state(&self) -> ConnState {
        match self {
            CloseReason::Peer => ConnState::ClosedByPeer,
            CloseReason::Local => ConnState::ClosedLocally,
            CloseReason::Failed(_) => ConnState::ClosedByError,
        }
    }

    /// Returns `true` for [`CloseReason::Failed`].
    pub fn is_failure(&self) -> bool {
        matches!(self, CloseReason::Failed(_))
    }
}

impl Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::Peer => Display::fmt(&HubError::ConnectionClosed, f),
            CloseReason::Local => write!(f, "closed locally"),
            CloseReason::Failed(cause) => write!(f, "{}", cause),
        }
    }
}

/// A decoded application message together with the connection it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEvent<M> {
    /// Connection the message arrived on.
    pub conn_id: ConnId,
    /// Decoded payload.
    pub data: M,
}

/// Connection lifecycle notifications.
///
/// Every event is logged through `tracing` before it reaches the optional
/// lifecycle handler; the `Display` output is the human readable line.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleEvent {
    /// The hub is bound and accepting.
    Listening {
        /// Bound local address.
        addr: SocketAddr,
    },
    /// The accept loop is waiting for the next connection.
    WaitingForConnection,
    /// A connection was accepted (hub) or established (endpoint).
    Connected {
        /// Identifier of the new record.
        id: ConnId,
        /// Remote address.
        addr: SocketAddr,
        /// Live connections after registration.
        count: usize,
    },
    /// An accepted socket was dropped because the hub is full.
    Rejected {
        /// Remote address.
        addr: SocketAddr,
        /// Live connections at the time.
        count: usize,
    },
    /// A connection ended and its record was removed.
    Disconnected {
        /// Identifier of the removed record.
        id: ConnId,
        /// Why it ended.
        reason: CloseReason,
        /// Live connections after removal.
        count: usize,
    },
}

impl LifecycleEvent {
    pub(crate) fn log(&self) {
        match self {
            LifecycleEvent::Listening { addr } => tracing::info!(%addr, "hub listening"),
            LifecycleEvent::WaitingForConnection => tracing::debug!("waiting for new connection"),
            LifecycleEvent::Connected { id, addr, count } => {
                tracing::info!(%id, %addr, count, "connection accepted")
            }
            LifecycleEvent::Rejected { addr, count } => {
                tracing::warn!(%addr, count, "connection rejected, limit reached")
            }
            LifecycleEvent::Disconnected { id, reason, count } => {
                if reason.is_failure() {
                    tracing::warn!(%id, %reason, count, "connection failed");
                } else {
                    tracing::info!(%id, %reason, count, "connection closed");
                }
            }
        }
    }
}

impl Display for LifecycleEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleEvent::Listening { addr } => write!(f, "Listening on {}", addr),
            LifecycleEvent::WaitingForConnection => write!(f, "Waiting for new connection..."),
            LifecycleEvent::Connected { id, addr, count } => write!(
                f,
                "New connection accepted. Id: {}, Endpoint: {}. Current client count: {}",
                id, addr, count
            ),
            LifecycleEvent::Rejected { addr, count } => write!(
                f,
                "Connection from {} rejected. Current client count: {}",
                addr, count
            ),
            LifecycleEvent::Disconnected { id, reason, count } => write!(
                f,
                "Client {} disconnected ({}). Current client count: {}",
                id, reason, count
            ),
        }
    }
}

/// Raised by the endpoint when a send fails.
#[derive(Debug, Clone, PartialEq)]
pub struct DisconnectEvent {
    /// The connection the write was attempted on.
    pub conn_id: ConnId,
    /// Text of the write error.
    pub cause: String,
}

impl Display for DisconnectEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Disconnected {}: {}", self.conn_id, self.cause)
    }
}

/// Async handler for decoded messages.
pub type MessageHandler<M> = Arc<dyn Fn(MessageEvent<M>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Async handler for lifecycle notifications.
pub type LifecycleHandler = Arc<dyn Fn(LifecycleEvent) -> BoxFuture<'static, ()> + Send + Sync>;

/// Async handler for endpoint send failures.
pub type DisconnectHandler = Arc<dyn Fn(DisconnectEvent) -> BoxFuture<'static, ()> + Send + Sync>;

//! Hub and endpoint configuration.
//!
//! All structs deserialize with serde and fall back to their defaults for
//! missing fields, so hosts can load them from whatever format they use.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use serde::{Deserialize, Serialize};

use crate::framer::DEFAULT_MAX_MESSAGE_SIZE;

/// Port the hub listens on by default.
pub const DEFAULT_PORT: u16 = 11000;

/// Size of each socket read in the receive loop.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 64 * 1024;

/// Per-connection settings shared by the hub and the endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Largest accepted inbound message; 0 disables the limit.
    pub max_message_size: usize,
    /// Bytes requested per socket read.
    pub read_buffer_size: usize,
    /// Undrained messages a connection may hold before it is dropped; 0 disables the limit.
    pub max_pending_messages: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            max_pending_messages: 0,
        }
    }
}

/// Settings for [`crate::hub::TcpHub`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Interface to bind.
    pub bind_address: IpAddr,
    /// Port to bind; 0 picks an ephemeral port.
    pub port: u16,
    /// Live connections allowed at once; 0 disables the limit.
    pub max_connections: usize,
    /// Settings applied to every accepted connection.
    pub connection: ConnectionConfig,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            max_connections: 0,
            connection: ConnectionConfig::default(),
        }
    }
}

impl HubConfig {
    /// Default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Address the listener binds.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    pub fn bind_address(mut self, addr: IpAddr) -> Self {
        self.bind_address = addr;
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn max_connections(mut self, limit: usize) -> Self {
        self.max_connections = limit;
        self
    }

    pub fn max_message_size(mut self, limit: usize) -> Self {
        self.connection.max_message_size = limit;
        self
    }

    pub fn max_pending_messages(mut self, limit: usize) -> Self {
        self.connection.max_pending_messages = limit;
        self
    }

    pub fn read_buffer_size(mut self, size: usize) -> Self {
        self.connection.read_buffer_size = size;
        self
    }
}

/// Settings for [`crate::endpoint::Endpoint`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Host of the hub to connect to.
    pub host: String,
    /// Port of the hub.
    pub port: u16,
    /// Settings for the single connection.
    pub connection: ConnectionConfig,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            host: Ipv4Addr::LOCALHOST.to_string(),
            port: DEFAULT_PORT,
            connection: ConnectionConfig::default(),
        }
    }
}

impl EndpointConfig {
    /// Default settings.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host<S: Into<String>>(mut self, host: S) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn max_message_size(mut self, limit: usize) -> Self {
        self.connection.max_message_size = limit;
        self
    }

    pub fn max_pending_messages(mut self, limit: usize) -> Self {
        self.connection.max_pending_messages = limit;
        self
    }
}

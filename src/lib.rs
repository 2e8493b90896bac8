//! # framehub
//!
//! Length-prefixed message hub over TCP.
//!
//! Every message on the wire is a 4-byte little-endian signed length
//! followed by that many payload bytes; a zero length is a keepalive. A
//! [`hub::TcpHub`] accepts any number of clients, reassembles their
//! messages independently and broadcasts to all of them at once. An
//! [`endpoint::Endpoint`] is the matching client.
//!
//! Payloads are opaque to the transport. A [`codec::Codec`] turns
//! application values into bytes; [`codec::MsgPackCodec`] covers serde types.
//!
//! ```no_run
//! use framehub::{codec::MsgPackCodec, config::EndpointConfig, endpoint::Endpoint};
//!
//! #[tokio::main]
//! async fn main() -> framehub::Result<()> {
//!     let endpoint = Endpoint::new(EndpointConfig::new(), MsgPackCodec::<String>::new());
//!     endpoint.connect("127.0.0.1:11000").await?;
//!     endpoint.send(&"hello".to_string()).await?;
//!
//!     for event in endpoint.drain().await.into_iter().flatten() {
//!         println!("{}: {}", event.conn_id, event.data);
//!     }
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod config;
pub mod conn;
pub mod endpoint;
pub mod framer;
pub mod handle;
pub mod hub;
pub mod registry;
pub mod types;

mod dispatch;

#[cfg(feature = "bench")]
pub mod bench_support;

#[cfg(test)]
mod tests;

pub use codec::{Codec, MsgPackCodec, RawCodec};
pub use conn::{ConnId, ConnState};
pub use endpoint::Endpoint;
pub use framer::Framer;
pub use hub::{Hub, TcpHub};
pub use types::{CloseReason, HubError, LifecycleEvent, MessageEvent, Result};

#![cfg(feature = "bench")]

//! Internal helpers for Criterion benchmarks.
//!
//! These helpers build in-memory connections backed by
//! `tokio::io::DuplexStream`, so the benchmarks exercise framing and
//! broadcast without binding real sockets.

use std::{net::SocketAddr, sync::Arc};

use bytes::Bytes;
use tokio::io::DuplexStream;
use tokio_util::sync::CancellationToken;

use crate::{
    conn::Connection,
    framer::{Framer, DEFAULT_MAX_MESSAGE_SIZE},
    handle::Broadcaster,
    registry::Registry,
};

/// Stream type used for in-process benchmarking.
pub type BenchStream = DuplexStream;

#[derive(Clone)]
/// Context wrapping a [`Broadcaster`] seeded with mock clients.
pub struct BroadcastContext {
    /// Broadcaster instance that benchmarks invoke.
    pub broadcaster: Broadcaster<BenchStream>,
    /// Frame written on every iteration.
    pub frame: Bytes,
}

impl BroadcastContext {
    /// Creates a context populated with `client_count` clients whose peers
    /// discard everything they receive.
    ///
    /// Must be called from inside a Tokio runtime.
    pub fn with_clients(client_count: usize, payload_size: usize) -> Self {
        let clients = Registry::new();
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));

        for _ in 0..client_count {
            let (stream, mut peer) = tokio::io::duplex(1024 * 1024);
            tokio::spawn(async move {
                let _ = tokio::io::copy(&mut peer, &mut tokio::io::sink()).await;
            });

            let (conn, _reader) = Connection::new(
                stream,
                addr,
                Framer::default(),
                CancellationToken::new(),
            );
            clients.add(conn);
        }

        let payload = vec![0x5a; payload_size];
        Self {
            broadcaster: Broadcaster::new(clients),
            frame: Framer::wrap(&payload).unwrap_or_else(|_| Framer::wrap_keepalive()),
        }
    }
}

/// A byte stream of back-to-back frames for framer throughput benches.
pub struct FramerContext {
    /// `message_count` frames of `payload_size` bytes each.
    pub stream: Bytes,
    /// Number of frames in `stream`.
    pub message_count: usize,
}

impl FramerContext {
    pub fn new(message_count: usize, payload_size: usize) -> Self {
        let payload = vec![0xa5; payload_size];
        let mut stream = Vec::with_capacity(message_count * (payload_size + 4));
        for _ in 0..message_count {
            if let Ok(frame) = Framer::wrap(&payload) {
                stream.extend_from_slice(&frame);
            }
        }

        Self {
            stream: Bytes::from(stream),
            message_count,
        }
    }

    /// Feed the stream in `chunk_size` pieces and count completed messages.
    pub fn reassemble(&self, chunk_size: usize) -> usize {
        let mut framer = Framer::new(DEFAULT_MAX_MESSAGE_SIZE);
        let mut count = 0;
        for chunk in self.stream.chunks(chunk_size.max(1)) {
            if framer.feed(chunk, |_| count += 1).is_err() {
                break;
            }
        }
        count
    }
}

/// Shared handle type used by the broadcast benches.
pub type SharedContext = Arc<BroadcastContext>;

//! Connection records.
//!
//! A [`Connection`] is the shared half of a live stream: its identifier, the
//! write half, the queue of decoded-but-undelivered messages, and its state.
//! The matching [`ConnectionReader`] owns the read half and the connection's
//! [`Framer`] and is consumed by the receive loop, so the framer is only ever
//! touched by one task.

use std::{
    collections::VecDeque,
    fmt::{Debug, Display},
    future::Future,
    io,
    net::SocketAddr,
    sync::{Arc, Mutex, OnceLock, PoisonError},
};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    config::ConnectionConfig,
    framer::Framer,
    types::{CloseReason, HubError},
};

/// Opaque, unique connection identifier (a random 128-bit value).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnId(Uuid);

impl ConnId {
    /// Generate a fresh identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ConnId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Lifecycle of a connection.
///
/// `Connecting -> Open -> {ClosedByPeer | ClosedByError | ClosedLocally}`.
/// The closed states are terminal; the first one reached wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Record created, receive loop not yet running.
    Connecting,
    /// Receive loop running.
    Open,
    /// The peer closed the stream.
    ClosedByPeer,
    /// A read or write failed, or the peer broke the framing protocol.
    ClosedByError,
    /// Closed from this side.
    ClosedLocally,
}

impl ConnState {
    /// `true` for the three terminal states.
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            ConnState::ClosedByPeer | ConnState::ClosedByError | ConnState::ClosedLocally
        )
    }
}

/// Shared side of one live connection.
pub struct Connection<T> {
    id: ConnId,
    addr: SocketAddr,
    writer: tokio::sync::Mutex<WriteHalf<T>>,
    inbox: Mutex<VecDeque<Bytes>>,
    state: Mutex<ConnState>,
    close_reason: OnceLock<CloseReason>,
    cancel: CancellationToken,
}

/// Read side of a connection: the read half plus its framer.
pub struct ConnectionReader<T> {
    reader: ReadHalf<T>,
    framer: Framer,
}

impl<T> Connection<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Split `stream` into a shared record and the reader that feeds it.
    ///
    /// `cancel` closes the connection: reads and writes racing it fail once
    /// it fires. Pass a child of the owning hub's token so hub shutdown
    /// reaches every connection.
    pub fn new(
        stream: T,
        addr: SocketAddr,
        framer: Framer,
        cancel: CancellationToken,
    ) -> (Arc<Self>, ConnectionReader<T>) {
        let (reader, writer) = tokio::io::split(stream);

        let conn = Arc::new(Self {
            id: ConnId::new(),
            addr,
            writer: tokio::sync::Mutex::new(writer),
            inbox: Mutex::new(VecDeque::new()),
            state: Mutex::new(ConnState::Connecting),
            close_reason: OnceLock::new(),
            cancel,
        });

        (conn, ConnectionReader { reader, framer })
    }

    /// Write one complete frame.
    ///
    /// Frames from concurrent callers never interleave. Fails immediately
    /// once the connection has been closed.
    pub async fn write_frame(&self, frame: &[u8]) -> io::Result<()> {
        if self.cancel.is_cancelled() {
            return Err(closed_error());
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(closed_error()),
            written = async {
                let mut writer = self.writer.lock().await;
                writer.write_all(frame).await?;
                writer.flush().await
            } => written,
        }
    }

    /// Best-effort FIN to the peer. Skipped if a write is in flight.
    pub(crate) async fn shutdown_writer(&self) {
        if let Ok(mut writer) = self.writer.try_lock() {
            let _ = writer.shutdown().await;
        }
    }
}

impl<T> Connection<T> {
    /// Connection identifier.
    pub fn id(&self) -> ConnId {
        self.id
    }

    /// Remote address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Current state.
    pub fn state(&self) -> ConnState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `true` while the receive loop is running and nothing has closed it.
    pub fn is_open(&self) -> bool {
        self.state() == ConnState::Open
    }

    /// Number of decoded-but-undelivered messages.
    pub fn pending(&self) -> usize {
        self.inbox.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Why the connection ended, once it has.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason.get().cloned()
    }

    /// Close from this side. Unblocks any read or write in progress.
    pub fn close(&self) {
        self.close_with(CloseReason::Local);
    }

    pub(crate) fn mark_open(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if *state == ConnState::Connecting {
            *state = ConnState::Open;
        }
    }

    /// Move to the terminal state for `reason` and cancel. The first reason wins.
    pub(crate) fn close_with(&self, reason: CloseReason) {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if !state.is_closed() {
                *state = reason.state();
            }
        }
        let _ = self.close_reason.set(reason);
        self.cancel.cancel();
    }

    pub(crate) fn enqueue(&self, message: Bytes) -> usize {
        let mut inbox = self.inbox.lock().unwrap_or_else(PoisonError::into_inner);
        inbox.push_back(message);
        inbox.len()
    }

    /// Dequeue everything queued so far, oldest first.
    pub(crate) fn take_messages(&self) -> Vec<Bytes> {
        let mut inbox = self.inbox.lock().unwrap_or_else(PoisonError::into_inner);
        inbox.drain(..).collect()
    }
}

impl<T> Debug for Connection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("state", &self.state())
            .field("pending", &self.pending())
            .finish()
    }
}

impl<T> ConnectionReader<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Run the receive loop until the connection ends.
    ///
    /// Each read of up to `read_buffer_size` bytes is fed to the framer and
    /// every completed message is queued on `conn`. `on_arrival` is awaited
    /// after any read that queued at least one message, including a read
    /// that ends the loop.
    ///
    /// Keepalives are the exception to "every completed message is queued":
    /// zero-length frames are consumed here and never reach `on_arrival` or
    /// a later drain.
    ///
    /// A zero-byte read ends the loop with [`CloseReason::Peer`]; read
    /// errors, protocol violations and backlog overflow end it with
    /// [`CloseReason::Failed`]; cancellation ends it with whatever reason the
    /// canceller recorded. The connection is closed before returning and the
    /// reason it was closed with is returned.
    pub async fn run<F, Fut>(
        mut self,
        conn: &Connection<T>,
        config: &ConnectionConfig,
        mut on_arrival: F,
    ) -> CloseReason
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()>,
    {
        conn.mark_open();

        let reason = self.read_until_closed(conn, config, &mut on_arrival).await;
        conn.close_with(reason.clone());
        conn.close_reason().unwrap_or(reason)
    }

    async fn read_until_closed<F, Fut>(
        &mut self,
        conn: &Connection<T>,
        config: &ConnectionConfig,
        on_arrival: &mut F,
    ) -> CloseReason
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut buf = vec![0u8; config.read_buffer_size.max(1)];

        loop {
            let read = tokio::select! {
                biased;
                _ = conn.cancel.cancelled() => return CloseReason::Local,
                read = self.reader.read(&mut buf) => read,
            };

            let n = match read {
                Ok(0) => {
                    if !self.framer.is_idle() {
                        tracing::debug!(
                            id = %conn.id,
                            discarded = self.framer.buffered(),
                            "peer closed mid-frame"
                        );
                    }
                    return CloseReason::Peer;
                }
                Ok(n) => n,
                Err(e) => return CloseReason::Failed(HubError::Transport(e).to_string()),
            };

            let mut queued = 0usize;
            let mut backlog = 0usize;
            let fed = self.framer.feed(&buf[..n], |message| {
                if message.is_empty() {
                    tracing::trace!(id = %conn.id, "keepalive received");
                    return;
                }
                backlog = conn.enqueue(message);
                queued += 1;
            });

            let limit = config.max_pending_messages;
            let failure = match fed {
                Err(e) => Some(CloseReason::Failed(e.to_string())),
                Ok(()) if limit > 0 && backlog > limit => Some(CloseReason::Failed(
                    HubError::BacklogExceeded { limit }.to_string(),
                )),
                Ok(()) => None,
            };

            // Messages completed ahead of a failure are still delivered.
            if queued > 0 {
                on_arrival().await;
            }

            if let Some(reason) = failure {
                return reason;
            }
        }
    }
}

impl<T> Debug for ConnectionReader<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionReader")
            .field("framer", &self.framer)
            .finish()
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "connection closed")
}

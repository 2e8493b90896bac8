//! The server side: accept loop, per-connection receive loops and broadcast.
//!
//! [`TcpHub`] owns a [`Registry`] of live connections. Every accepted socket
//! gets a fresh record and framer and its own receive task; the accept loop
//! never waits on a connection. [`TcpHub::broadcast`] encodes a message once,
//! wraps it once, and writes the same frame to every connection in parallel.
//!
//! # Example
//!
//! ```no_run
//! use framehub::{codec::MsgPackCodec, config::HubConfig, hub::TcpHub};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), framehub::HubError> {
//!     let hub = TcpHub::new(HubConfig::new().port(11000), MsgPackCodec::<String>::new());
//!
//!     let relay = hub.clone();
//!     hub.on_message(move |event| {
//!         let relay = relay.clone();
//!         async move {
//!             let _ = relay.broadcast(&event.data).await;
//!         }
//!     });
//!
//!     hub.start().await?;
//!     tokio::signal::ctrl_c().await?;
//!     hub.shutdown();
//!     Ok(())
//! }
//! ```

use std::{
    fmt::Debug,
    future::Future,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, OnceLock,
    },
};

use bytes::Bytes;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::{
    codec::Codec,
    config::HubConfig,
    conn::{ConnId, Connection, ConnectionReader},
    dispatch::Dispatcher,
    framer::Framer,
    handle::{write_failure, BroadcastReport, Broadcaster},
    registry::Registry,
    types::{CloseReason, HubError, LifecycleEvent, MessageEvent, Result},
};

/// What the hub and the endpoint have in common.
///
/// `open` accepts (hub) or connects (endpoint); `send` broadcasts (hub) or
/// sends to the one peer (endpoint).
pub trait Hub: Send + Sync {
    /// Decoded application message.
    type Message: Send + Sync + 'static;

    /// Start accepting, or connect. Returns the bound local address for a
    /// hub and the peer address for an endpoint.
    fn open(&self) -> impl Future<Output = Result<SocketAddr>> + Send;

    /// Encode, frame and write `message`.
    fn send(&self, message: &Self::Message) -> impl Future<Output = Result<()>> + Send;

    /// Dequeue and decode every message received so far.
    fn drain(&self) -> impl Future<Output = Vec<Result<MessageEvent<Self::Message>>>> + Send;

    /// Install the decoded-message handler.
    fn on_message<F, Fut>(&self, handler: F)
    where
        F: Fn(MessageEvent<Self::Message>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static;

    /// Install the lifecycle handler.
    fn on_lifecycle<F, Fut>(&self, handler: F)
    where
        F: Fn(LifecycleEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static;

    /// Close every connection this side owns.
    fn close(&self);
}

/// TCP server broadcasting framed messages to all connected clients.
///
/// Cheap to clone; clones share the same listener, registry and handlers.
pub struct TcpHub<C: Codec> {
    inner: Arc<HubInner<C>>,
}

struct HubInner<C: Codec> {
    config: HubConfig,
    clients: Registry<TcpStream>,
    broadcaster: Broadcaster<TcpStream>,
    dispatcher: Dispatcher<C>,
    shutdown: CancellationToken,
    started: AtomicBool,
    local_addr: OnceLock<SocketAddr>,
}

impl<C: Codec> Clone for TcpHub<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Codec> Debug for TcpHub<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpHub")
            .field("config", &self.inner.config)
            .field("local_addr", &self.inner.local_addr.get())
            .field("clients", &self.inner.clients)
            .finish()
    }
}

impl<C: Codec> TcpHub<C> {
    /// Create a hub. Nothing is bound until [`TcpHub::start`].
    pub fn new(config: HubConfig, codec: C) -> Self {
        let clients = Registry::new();
        Self {
            inner: Arc::new(HubInner {
                config,
                broadcaster: Broadcaster::new(clients.clone()),
                clients,
                dispatcher: Dispatcher::new(codec),
                shutdown: CancellationToken::new(),
                started: AtomicBool::new(false),
                local_addr: OnceLock::new(),
            }),
        }
    }

    /// Bind the listener and spawn the accept loop.
    ///
    /// Returns once the listener is bound; bind failures are returned here.
    pub async fn start(&self) -> Result<SocketAddr> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(HubError::AlreadyStarted);
        }

        let addr = self.inner.config.listen_addr();
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(source) => {
                self.inner.started.store(false, Ordering::SeqCst);
                return Err(HubError::Bind { addr, source });
            }
        };
        let local = listener.local_addr()?;
        let _ = self.inner.local_addr.set(local);

        self.inner
            .dispatcher
            .lifecycle(LifecycleEvent::Listening { addr: local })
            .await;

        tokio::spawn(Arc::clone(&self.inner).accept_loop(listener));
        Ok(local)
    }

    /// Address the listener is bound to, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner.local_addr.get().copied()
    }

    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    /// Encode `message` and write it to every connected client.
    ///
    /// Clients whose write fails are disconnected and removed; the rest still
    /// receive the frame. Only an encoding failure is returned as an error.
    pub async fn broadcast(&self, message: &C::Message) -> Result<BroadcastReport> {
        let frame = self.inner.dispatcher.encode_frame(message)?;
        Ok(self.inner.fan_out(frame).await)
    }

    /// Write a keepalive frame to every connected client.
    pub async fn broadcast_keepalive(&self) -> BroadcastReport {
        self.inner.fan_out(Framer::wrap_keepalive()).await
    }

    /// Dequeue and decode every message received so far.
    ///
    /// Messages from one connection come out in arrival order; connections
    /// are visited in registration order.
    pub async fn drain(&self) -> Vec<Result<MessageEvent<C::Message>>> {
        let records = self.inner.clients.snapshot();
        self.inner.dispatcher.drain(&records).await
    }

    /// Handle decoded messages as they arrive.
    ///
    /// Once installed, every receive loop that completes a message drains
    /// all connections into `handler`. The handler may broadcast but must not
    /// call [`TcpHub::drain`].
    pub fn on_message<F, Fut>(&self, handler: F)
    where
        F: Fn(MessageEvent<C::Message>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.inner.dispatcher.set_message_handler(handler);
    }

    /// Observe connection lifecycle events.
    pub fn on_lifecycle<F, Fut>(&self, handler: F)
    where
        F: Fn(LifecycleEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.inner.dispatcher.set_lifecycle_handler(handler);
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.inner.clients.count()
    }

    /// The live connection registry.
    pub fn registry(&self) -> &Registry<TcpStream> {
        &self.inner.clients
    }

    /// Close one connection. Returns `false` if it is not registered.
    ///
    /// Its receive loop unregisters it and reports the disconnect.
    pub fn disconnect(&self, id: ConnId) -> bool {
        match self.inner.clients.get(id) {
            Some(conn) => {
                conn.close();
                true
            }
            None => false,
        }
    }

    /// Stop accepting and close every connection.
    pub fn shutdown(&self) {
        tracing::info!("hub shutting down");
        self.inner.shutdown.cancel();
    }

    /// `true` between a successful `start` and `shutdown`.
    pub fn is_running(&self) -> bool {
        self.inner.local_addr.get().is_some() && !self.inner.shutdown.is_cancelled()
    }
}

impl<C: Codec> HubInner<C> {
    async fn accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            self.dispatcher
                .lifecycle(LifecycleEvent::WaitingForConnection)
                .await;

            let accepted = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, addr)) => self.admit(stream, addr).await,
                Err(e) => tracing::warn!(error = %e, "accept failed"),
            }
        }

        tracing::debug!("accept loop stopped");
    }

    async fn admit(self: &Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        let limit = self.config.max_connections;
        if limit > 0 && self.clients.count() >= limit {
            drop(stream);
            self.dispatcher
                .lifecycle(LifecycleEvent::Rejected {
                    addr,
                    count: self.clients.count(),
                })
                .await;
            return;
        }

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%addr, error = %e, "could not set TCP_NODELAY");
        }

        let framer = Framer::new(self.config.connection.max_message_size);
        let (conn, reader) = Connection::new(stream, addr, framer, self.shutdown.child_token());
        self.clients.add(Arc::clone(&conn));

        self.dispatcher
            .lifecycle(LifecycleEvent::Connected {
                id: conn.id(),
                addr,
                count: self.clients.count(),
            })
            .await;

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            inner.receive_loop(conn, reader).await;
        });
    }

    async fn receive_loop(
        &self,
        conn: Arc<Connection<TcpStream>>,
        reader: ConnectionReader<TcpStream>,
    ) {
        let reason = reader
            .run(&conn, &self.config.connection, || self.dispatch_pending())
            .await;
        self.retire(&conn, reason).await;
    }

    async fn dispatch_pending(&self) {
        let records = self.clients.snapshot();
        self.dispatcher.dispatch(&records).await;
    }

    /// The one place a record leaves the registry because its receive side ended.
    async fn retire(&self, conn: &Connection<TcpStream>, reason: CloseReason) {
        if self.clients.remove(conn.id()).is_none() {
            return;
        }
        conn.shutdown_writer().await;

        self.dispatcher
            .lifecycle(LifecycleEvent::Disconnected {
                id: conn.id(),
                reason,
                count: self.clients.count(),
            })
            .await;
    }

    async fn fan_out(&self, frame: Bytes) -> BroadcastReport {
        let report = self.broadcaster.emit(frame).await;

        for (id, e) in &report.failed {
            self.dispatcher
                .lifecycle(LifecycleEvent::Disconnected {
                    id: *id,
                    reason: CloseReason::Failed(write_failure(e)),
                    count: self.clients.count(),
                })
                .await;
        }

        report
    }
}

impl<C: Codec> Hub for TcpHub<C> {
    type Message = C::Message;

    async fn open(&self) -> Result<SocketAddr> {
        self.start().await
    }

    async fn send(&self, message: &C::Message) -> Result<()> {
        self.broadcast(message).await.map(|_| ())
    }

    async fn drain(&self) -> Vec<Result<MessageEvent<C::Message>>> {
        TcpHub::drain(self).await
    }

    fn on_message<F, Fut>(&self, handler: F)
    where
        F: Fn(MessageEvent<C::Message>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        TcpHub::on_message(self, handler);
    }

    fn on_lifecycle<F, Fut>(&self, handler: F)
    where
        F: Fn(LifecycleEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        TcpHub::on_lifecycle(self, handler);
    }

    fn close(&self) {
        self.shutdown();
    }
}

//! The client side: one connection to a hub.
//!
//! [`Endpoint`] runs the same receive loop as the hub against a single
//! [`Connection`]. A failed send closes the connection and raises a
//! [`DisconnectEvent`]; nothing is retried.

use std::{
    fmt::Debug,
    future::Future,
    net::SocketAddr,
    sync::{Arc, PoisonError, RwLock},
};

use bytes::Bytes;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::sync::CancellationToken;

use crate::{
    codec::Codec,
    config::EndpointConfig,
    conn::{ConnId, ConnState, Connection, ConnectionReader},
    dispatch::Dispatcher,
    framer::Framer,
    handle::write_failure,
    hub::Hub,
    types::{CloseReason, DisconnectEvent, HubError, LifecycleEvent, MessageEvent, Result},
};

/// TCP client exchanging framed messages with a [`crate::hub::TcpHub`].
///
/// Cheap to clone; clones share the connection and handlers.
pub struct Endpoint<C: Codec> {
    inner: Arc<EndpointInner<C>>,
}

struct EndpointInner<C: Codec> {
    config: EndpointConfig,
    dispatcher: Dispatcher<C>,
    conn: RwLock<Option<Arc<Connection<TcpStream>>>>,
    connecting: tokio::sync::Mutex<()>,
}

impl<C: Codec> Clone for Endpoint<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Codec> Debug for Endpoint<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("config", &self.inner.config)
            .field("conn", &self.inner.current())
            .finish()
    }
}

impl<C: Codec> Endpoint<C> {
    pub fn new(config: EndpointConfig, codec: C) -> Self {
        Self {
            inner: Arc::new(EndpointInner {
                config,
                dispatcher: Dispatcher::new(codec),
                conn: RwLock::new(None),
                connecting: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Connect to `addr` and start the receive loop.
    ///
    /// Fails with [`HubError::AlreadyStarted`] while a previous connection
    /// is still open; a closed one is replaced.
    pub async fn connect<A>(&self, addr: A) -> Result<SocketAddr>
    where
        A: ToSocketAddrs + Send,
    {
        let _connecting = self.inner.connecting.lock().await;
        if self
            .inner
            .current()
            .is_some_and(|conn| !conn.state().is_closed())
        {
            return Err(HubError::AlreadyStarted);
        }

        let stream = TcpStream::connect(addr).await?;
        let peer = stream.peer_addr()?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%peer, error = %e, "could not set TCP_NODELAY");
        }

        let framer = Framer::new(self.inner.config.connection.max_message_size);
        let (conn, reader) = Connection::new(stream, peer, framer, CancellationToken::new());
        *self
            .inner
            .conn
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&conn));

        self.inner
            .dispatcher
            .lifecycle(LifecycleEvent::Connected {
                id: conn.id(),
                addr: peer,
                count: 1,
            })
            .await;

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.receive_loop(conn, reader).await;
        });

        Ok(peer)
    }

    /// Encode `message` and send it to the hub.
    ///
    /// # Errors
    ///
    /// [`HubError::Encoding`] if the codec fails, [`HubError::NotConnected`]
    /// before the first connect, and [`HubError::Transport`] when the write
    /// fails. A failed write also closes the connection and raises a
    /// [`DisconnectEvent`].
    pub async fn send(&self, message: &C::Message) -> Result<()> {
        let frame = self.inner.dispatcher.encode_frame(message)?;
        self.write(frame).await
    }

    /// Send a keepalive frame.
    pub async fn send_keepalive(&self) -> Result<()> {
        self.write(Framer::wrap_keepalive()).await
    }

    async fn write(&self, frame: Bytes) -> Result<()> {
        let conn = self.inner.current().ok_or(HubError::NotConnected)?;

        if let Err(e) = conn.write_frame(&frame).await {
            conn.close_with(CloseReason::Failed(write_failure(&e)));
            self.inner
                .dispatcher
                .disconnected(DisconnectEvent {
                    conn_id: conn.id(),
                    cause: e.to_string(),
                })
                .await;
            return Err(HubError::Transport(e));
        }
        Ok(())
    }

    /// Dequeue and decode every message received so far, oldest first.
    pub async fn drain(&self) -> Vec<Result<MessageEvent<C::Message>>> {
        let records: Vec<_> = self.inner.current().into_iter().collect();
        self.inner.dispatcher.drain(&records).await
    }

    /// Handle decoded messages as they arrive. The handler must not call
    /// [`Endpoint::drain`].
    pub fn on_message<F, Fut>(&self, handler: F)
    where
        F: Fn(MessageEvent<C::Message>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.inner.dispatcher.set_message_handler(handler);
    }

    pub fn on_lifecycle<F, Fut>(&self, handler: F)
    where
        F: Fn(LifecycleEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.inner.dispatcher.set_lifecycle_handler(handler);
    }

    /// Observe send failures.
    pub fn on_disconnect<F, Fut>(&self, handler: F)
    where
        F: Fn(DisconnectEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.inner.dispatcher.set_disconnect_handler(handler);
    }

    /// Close the connection. Its receive loop reports the disconnect.
    pub fn disconnect(&self) {
        if let Some(conn) = self.inner.current() {
            conn.close();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner.current().is_some_and(|conn| conn.is_open())
    }

    /// State of the current connection, if one was ever made.
    pub fn state(&self) -> Option<ConnState> {
        self.inner.current().map(|conn| conn.state())
    }

    pub fn id(&self) -> Option<ConnId> {
        self.inner.current().map(|conn| conn.id())
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.inner.current().map(|conn| conn.addr())
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.inner.config
    }
}

impl<C: Codec> EndpointInner<C> {
    fn current(&self) -> Option<Arc<Connection<TcpStream>>> {
        self.conn
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn receive_loop(
        &self,
        conn: Arc<Connection<TcpStream>>,
        reader: ConnectionReader<TcpStream>,
    ) {
        let records = [Arc::clone(&conn)];
        let reason = reader
            .run(&conn, &self.config.connection, || self.dispatcher.dispatch(&records))
            .await;

        conn.shutdown_writer().await;
        self.dispatcher
            .lifecycle(LifecycleEvent::Disconnected {
                id: conn.id(),
                reason,
                count: 0,
            })
            .await;
    }
}

impl<C: Codec> Hub for Endpoint<C> {
    type Message = C::Message;

    async fn open(&self) -> Result<SocketAddr> {
        let host = self.inner.config.host.clone();
        let port = self.inner.config.port;
        self.connect((host, port)).await
    }

    async fn send(&self, message: &C::Message) -> Result<()> {
        Endpoint::send(self, message).await
    }

    async fn drain(&self) -> Vec<Result<MessageEvent<C::Message>>> {
        Endpoint::drain(self).await
    }

    fn on_message<F, Fut>(&self, handler: F)
    where
        F: Fn(MessageEvent<C::Message>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Endpoint::on_message(self, handler);
    }

    fn on_lifecycle<F, Fut>(&self, handler: F)
    where
        F: Fn(LifecycleEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Endpoint::on_lifecycle(self, handler);
    }

    fn close(&self) {
        self.disconnect();
    }
}

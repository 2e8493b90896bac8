//! Drain, decode and event delivery shared by the hub and the endpoint.

use std::{
    future::Future,
    sync::{Arc, PoisonError, RwLock},
};

use bytes::Bytes;
use futures::FutureExt;

use crate::{
    codec::Codec,
    conn::Connection,
    framer::Framer,
    types::{
        DisconnectEvent, DisconnectHandler, LifecycleEvent, LifecycleHandler, MessageEvent,
        MessageHandler, Result,
    },
};

type Message<C> = <C as Codec>::Message;

pub(crate) struct Dispatcher<C: Codec> {
    codec: C,
    on_message: RwLock<Option<MessageHandler<Message<C>>>>,
    on_lifecycle: RwLock<Option<LifecycleHandler>>,
    on_disconnect: RwLock<Option<DisconnectHandler>>,
    /// Serializes drain passes so each connection's messages come out in order.
    drain_lock: tokio::sync::Mutex<()>,
}

impl<C: Codec> Dispatcher<C> {
    pub(crate) fn new(codec: C) -> Self {
        Self {
            codec,
            on_message: RwLock::new(None),
            on_lifecycle: RwLock::new(None),
            on_disconnect: RwLock::new(None),
            drain_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Encode once and wrap once.
    pub(crate) fn encode_frame(&self, message: &Message<C>) -> Result<Bytes> {
        let payload = self.codec.encode(message)?;
        Framer::wrap(&payload)
    }

    pub(crate) fn set_message_handler<F, Fut>(&self, handler: F)
    where
        F: Fn(MessageEvent<Message<C>>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: MessageHandler<Message<C>> = Arc::new(move |event| handler(event).boxed());
        *self.on_message.write().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    pub(crate) fn set_lifecycle_handler<F, Fut>(&self, handler: F)
    where
        F: Fn(LifecycleEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: LifecycleHandler = Arc::new(move |event| handler(event).boxed());
        *self.on_lifecycle.write().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    pub(crate) fn set_disconnect_handler<F, Fut>(&self, handler: F)
    where
        F: Fn(DisconnectEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: DisconnectHandler = Arc::new(move |event| handler(event).boxed());
        *self.on_disconnect.write().unwrap_or_else(PoisonError::into_inner) = Some(handler);
    }

    fn message_handler(&self) -> Option<MessageHandler<Message<C>>> {
        self.on_message
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Dequeue and decode everything queued on `records`, record by record.
    ///
    /// A payload that fails to decode yields an `Err` in its slot and does
    /// not affect any other message.
    fn decode_pending<T>(
        &self,
        records: &[Arc<Connection<T>>],
    ) -> Vec<Result<MessageEvent<Message<C>>>> {
        let mut events = Vec::new();
        for conn in records {
            for payload in conn.take_messages() {
                let decoded = self.codec.decode(&payload).map(|data| MessageEvent {
                    conn_id: conn.id(),
                    data,
                });
                if let Err(e) = &decoded {
                    tracing::warn!(id = %conn.id(), error = %e, "dropping undecodable message");
                }
                events.push(decoded);
            }
        }
        events
    }

    pub(crate) async fn drain<T>(
        &self,
        records: &[Arc<Connection<T>>],
    ) -> Vec<Result<MessageEvent<Message<C>>>> {
        let _guard = self.drain_lock.lock().await;
        self.decode_pending(records)
    }

    /// Drain `records` into the message handler, if one is installed.
    pub(crate) async fn dispatch<T>(&self, records: &[Arc<Connection<T>>]) {
        let Some(handler) = self.message_handler() else {
            return;
        };

        let _guard = self.drain_lock.lock().await;
        for event in self.decode_pending(records).into_iter().flatten() {
            handler(event).await;
        }
    }

    pub(crate) async fn lifecycle(&self, event: LifecycleEvent) {
        event.log();
        let handler = self
            .on_lifecycle
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(handler) = handler {
            handler(event).await;
        }
    }

    pub(crate) async fn disconnected(&self, event: DisconnectEvent) {
        tracing::warn!(id = %event.conn_id, cause = %event.cause, "send failed, disconnected");
        let handler = self
            .on_disconnect
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(handler) = handler {
            handler(event).await;
        }
    }
}

//! Broadcast fan-out.
//!
//! [`Broadcaster`] writes one prebuilt frame to every connection in a
//! registry snapshot. Writes run concurrently and independently: a failed
//! write closes and unregisters that connection and nothing else.
use std::{fmt::Debug, io, sync::Arc};

use bytes::Bytes;
use futures::future::join_all;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    conn::{ConnId, Connection},
    registry::Registry,
    types::CloseReason,
};

/// Outcome of one broadcast.
#[derive(Debug, Default)]
pub struct BroadcastReport {
    /// Connections the frame was fully written to.
    pub delivered: Vec<ConnId>,
    /// Connections whose write failed and that this broadcast removed.
    pub failed: Vec<(ConnId, io::Error)>,
}

impl BroadcastReport {
    /// Number of connections written to.
    pub fn delivered_count(&self) -> usize {
        self.delivered.len()
    }

    /// `true` if no write failed.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Sends frames to all connections of a [`Registry`].
pub struct Broadcaster<T> {
    /// Shared registry of all active connections.
    clients: Registry<T>,
}

impl<T> Clone for Broadcaster<T> {
    fn clone(&self) -> Self {
        Self {
            clients: self.clients.clone(),
        }
    }
}

impl<T> Debug for Broadcaster<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broadcaster")
            .field("clients", &self.clients)
            .finish()
    }
}

impl<T> Broadcaster<T>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
{
    pub fn new(clients: Registry<T>) -> Self {
        Self { clients }
    }

    /// Write `frame` to every connection registered at call time.
    ///
    /// Returns once every write has completed or failed. Never fails as a
    /// whole; per-connection failures are listed in the report.
    pub async fn emit(&self, frame: Bytes) -> BroadcastReport {
        let recipients = self.clients.snapshot();

        let writes = recipients.iter().map(|conn| {
            let frame = frame.clone();
            async move { (conn, conn.write_frame(&frame).await) }
        });
        let results = join_all(writes).await;

        let mut report = BroadcastReport::default();
        for (conn, result) in results {
            match result {
                Ok(()) => report.delivered.push(conn.id()),
                Err(e) => {
                    if let Some(removed) = self.prune(conn, &e) {
                        tracing::warn!(id = %removed, error = %e, "broadcast write failed");
                        report.failed.push((removed, e));
                    } else {
                        tracing::debug!(
                            id = %conn.id(),
                            error = %e,
                            "write to retired connection failed"
                        );
                    }
                }
            }
        }

        tracing::trace!(
            bytes = frame.len(),
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "broadcast complete"
        );
        report
    }

    fn prune(&self, conn: &Arc<Connection<T>>, error: &io::Error) -> Option<ConnId> {
        conn.close_with(CloseReason::Failed(write_failure(error)));
        self.clients.remove(conn.id()).map(|c| c.id())
    }
}

pub(crate) fn write_failure(error: &io::Error) -> String {
    format!("write failed: {}", error)
}

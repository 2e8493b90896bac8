//! The set of live connections.
//!
//! All mutation happens under one short-lived lock. I/O never does: callers
//! take a [`Registry::snapshot`] and work on that, so a stalled peer cannot
//! hold up unrelated adds and removes.

use std::{
    fmt::Debug,
    net::SocketAddr,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::conn::{ConnId, Connection};

/// Concurrency-safe registry of [`Connection`] records, in insertion order.
pub struct Registry<T> {
    clients: Arc<Mutex<Vec<Arc<Connection<T>>>>>,
}

impl<T> Clone for Registry<T> {
    fn clone(&self) -> Self {
        Self {
            clients: Arc::clone(&self.clients),
        }
    }
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Registry<T> {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            clients: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Arc<Connection<T>>>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `conn`. Returns `false` if its id is already present.
    pub fn add(&self, conn: Arc<Connection<T>>) -> bool {
        let mut clients = self.lock();
        if clients.iter().any(|c| c.id() == conn.id()) {
            return false;
        }
        clients.push(conn);
        true
    }

    /// Remove the record with `id`, returning it if it was present.
    ///
    /// Removing an absent record is a no-op, so a receive-side failure and a
    /// write-side failure can both try.
    pub fn remove(&self, id: ConnId) -> Option<Arc<Connection<T>>> {
        let mut clients = self.lock();
        let index = clients.iter().position(|c| c.id() == id)?;
        Some(clients.remove(index))
    }

    /// Point-in-time copy of the registered records.
    pub fn snapshot(&self) -> Vec<Arc<Connection<T>>> {
        self.lock().clone()
    }

    /// Number of live records.
    pub fn count(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains(&self, id: ConnId) -> bool {
        self.lock().iter().any(|c| c.id() == id)
    }

    pub fn get(&self, id: ConnId) -> Option<Arc<Connection<T>>> {
        self.lock().iter().find(|c| c.id() == id).cloned()
    }

    /// Identifier of the record connected from `addr`, for diagnostics.
    pub fn find_by_addr(&self, addr: SocketAddr) -> Option<ConnId> {
        self.lock().iter().find(|c| c.addr() == addr).map(|c| c.id())
    }
}

impl<T> Debug for Registry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("count", &self.count())
            .finish()
    }
}

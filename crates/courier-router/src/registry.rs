// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-node table of locally held connections.
//!
//! The registry never calls into presence or the bus, and its lock is only
//! held for map operations. Handles displaced or drained from the table are
//! closed after the lock is released.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use courier_core::{ConnectionHandle, UserId};

/// Maps each connected user to the one live handle this node holds for them.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<UserId, Arc<dyn ConnectionHandle>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `handle` to `user`. A different handle previously bound to the
    /// user is closed and returned.
    pub async fn put(
        &self,
        user: UserId,
        handle: Arc<dyn ConnectionHandle>,
    ) -> Option<Arc<dyn ConnectionHandle>> {
        let new_id = handle.connection_id().to_string();
        let previous = self.connections.write().await.insert(user.clone(), handle);

        match previous {
            Some(old) if old.connection_id() != new_id => {
                debug!(
                    user_id = %user,
                    old_connection = old.connection_id(),
                    new_connection = new_id.as_str(),
                    "replacing existing connection"
                );
                old.close();
                Some(old)
            }
            _ => None,
        }
    }

    pub async fn get(&self, user: &UserId) -> Option<Arc<dyn ConnectionHandle>> {
        self.connections.read().await.get(user).cloned()
    }

    /// Unbinds `user`. Removing an absent user is a no-op.
    pub async fn remove(&self, user: &UserId) -> Option<Arc<dyn ConnectionHandle>> {
        self.connections.write().await.remove(user)
    }

    /// Unbinds `user` only while it is still bound to `connection_id`.
    pub async fn remove_if(&self, user: &UserId, connection_id: &str) -> bool {
        let mut connections = self.connections.write().await;
        match connections.get(user) {
            Some(handle) if handle.connection_id() == connection_id => {
                connections.remove(user);
                true
            }
            _ => false,
        }
    }

    pub async fn contains(&self, user: &UserId) -> bool {
        self.connections.read().await.contains_key(user)
    }

    pub async fn users(&self) -> Vec<UserId> {
        self.connections.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    /// Empties the registry, closing every handle it held.
    pub async fn drain(&self) -> Vec<(UserId, Arc<dyn ConnectionHandle>)> {
        let drained: Vec<_> = self.connections.write().await.drain().collect();
        for (_, handle) in &drained {
            handle.close();
        }
        drained
    }
}

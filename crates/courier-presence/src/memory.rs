// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-process presence directory.
//!
//! Shares state only between routing services in the same process, so it is
//! suited to single-node deployments and to multi-node tests. Expiry uses the
//! tokio clock, which lets tests drive TTLs with `tokio::time::advance`.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use courier_core::traits::{BackendAdapter, PresenceDirectory};
use courier_core::{CourierError, HealthStatus, NodeId, UserId};

#[derive(Debug, Clone)]
struct Entry {
    node_id: NodeId,
    expires_at: Instant,
}

/// Presence directory backed by a concurrent map.
#[derive(Debug, Default)]
pub struct MemoryPresence {
    entries: DashMap<UserId, Entry>,
}

impl MemoryPresence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, live or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drops every record whose TTL has elapsed. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        before - self.entries.len()
    }
}

#[async_trait]
impl BackendAdapter for MemoryPresence {
    fn name(&self) -> &str {
        "memory"
    }

    async fn health_check(&self) -> Result<HealthStatus, CourierError> {
        Ok(HealthStatus::Healthy)
    }
}

#[async_trait]
impl PresenceDirectory for MemoryPresence {
    async fn register(
        &self,
        user: &UserId,
        node: &NodeId,
        ttl: Duration,
    ) -> Result<(), CourierError> {
        let expires_at = Instant::now()
            .checked_add(ttl)
            .ok_or_else(|| CourierError::Internal(format!("presence ttl {ttl:?} overflows")))?;
        self.entries.insert(
            user.clone(),
            Entry {
                node_id: node.clone(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn unregister(&self, user: &UserId) -> Result<(), CourierError> {
        self.entries.remove(user);
        Ok(())
    }

    async fn unregister_if_owned(
        &self,
        user: &UserId,
        node: &NodeId,
    ) -> Result<bool, CourierError> {
        let now = Instant::now();
        let removed = self
            .entries
            .remove_if(user, |_, entry| entry.node_id == *node || entry.expires_at <= now);
        Ok(removed.is_some())
    }

    async fn lookup(&self, user: &UserId) -> Result<Option<NodeId>, CourierError> {
        let now = Instant::now();
        match self.entries.get(user) {
            Some(entry) if entry.expires_at > now => return Ok(Some(entry.node_id.clone())),
            Some(_) => {}
            None => return Ok(None),
        }

        // The map guard is released above; a concurrent register may have
        // refreshed the record since, so only remove it if still stale.
        if self
            .entries
            .remove_if(user, |_, entry| entry.expires_at <= now)
            .is_some()
        {
            debug!(user_id = %user, "presence record expired");
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(300);

    #[tokio::test(start_paused = true)]
    async fn lookup_returns_registered_node_within_ttl() {
        let presence = MemoryPresence::new();
        presence.register(&"alice".into(), &"node-a".into(), TTL).await.unwrap();

        tokio::time::advance(Duration::from_secs(299)).await;
        let node = presence.lookup(&"alice".into()).await.unwrap();
        assert_eq!(node, Some(NodeId::from("node-a")));
    }

    #[tokio::test(start_paused = true)]
    async fn lookup_returns_none_after_ttl() {
        let presence = MemoryPresence::new();
        presence.register(&"alice".into(), &"node-a".into(), TTL).await.unwrap();

        tokio::time::advance(Duration::from_secs(301)).await;
        assert_eq!(presence.lookup(&"alice".into()).await.unwrap(), None);
        assert!(presence.is_empty(), "expired record should be dropped on lookup");
    }

    #[tokio::test(start_paused = true)]
    async fn register_resets_ttl() {
        let presence = MemoryPresence::new();
        let alice = UserId::from("alice");
        presence.register(&alice, &"node-a".into(), TTL).await.unwrap();
        tokio::time::advance(Duration::from_secs(200)).await;
        presence.register(&alice, &"node-a".into(), TTL).await.unwrap();
        tokio::time::advance(Duration::from_secs(200)).await;

        assert!(presence.lookup(&alice).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn last_writer_wins() {
        let presence = MemoryPresence::new();
        let alice = UserId::from("alice");
        presence.register(&alice, &"node-a".into(), TTL).await.unwrap();
        presence.register(&alice, &"node-b".into(), TTL).await.unwrap();

        assert_eq!(presence.lookup(&alice).await.unwrap(), Some("node-b".into()));
        assert_eq!(presence.len(), 1);
    }

    #[tokio::test]
    async fn unregister_is_idempotent() {
        let presence = MemoryPresence::new();
        let alice = UserId::from("alice");
        presence.register(&alice, &"node-a".into(), TTL).await.unwrap();

        presence.unregister(&alice).await.unwrap();
        presence.unregister(&alice).await.unwrap();
        assert_eq!(presence.lookup(&alice).await.unwrap(), None);
    }

    #[tokio::test]
    async fn unregister_if_owned_removes_own_record() {
        let presence = MemoryPresence::new();
        let alice = UserId::from("alice");
        presence.register(&alice, &"node-a".into(), TTL).await.unwrap();

        assert!(presence.unregister_if_owned(&alice, &"node-a".into()).await.unwrap());
        assert_eq!(presence.lookup(&alice).await.unwrap(), None);
        assert!(!presence.unregister_if_owned(&alice, &"node-a".into()).await.unwrap());
    }

    #[tokio::test]
    async fn unregister_if_owned_keeps_record_of_other_node() {
        let presence = MemoryPresence::new();
        let alice = UserId::from("alice");
        presence.register(&alice, &"node-b".into(), TTL).await.unwrap();

        assert!(!presence.unregister_if_owned(&alice, &"node-a".into()).await.unwrap());
        assert_eq!(presence.lookup(&alice).await.unwrap(), Some("node-b".into()));
    }

    #[tokio::test]
    async fn unknown_user_is_not_found() {
        let presence = MemoryPresence::new();
        assert_eq!(presence.lookup(&"ghost".into()).await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_expired_removes_only_stale_records() {
        let presence = MemoryPresence::new();
        presence
            .register(&"old".into(), &"node-a".into(), Duration::from_secs(10))
            .await
            .unwrap();
        presence.register(&"new".into(), &"node-a".into(), TTL).await.unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(presence.purge_expired(), 1);
        assert_eq!(presence.len(), 1);
    }

    #[tokio::test]
    async fn health_is_always_healthy() {
        let presence = MemoryPresence::new();
        assert_eq!(presence.name(), "memory");
        assert_eq!(presence.health_check().await.unwrap(), HealthStatus::Healthy);
    }
}

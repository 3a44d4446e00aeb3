// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Presence-aware routing between locally held connections and the bus.
//!
//! Sending resolves the receiver's owning node through the presence directory
//! and publishes under that node's partition key. Each node subscribes to its
//! own key and hands what arrives to the receiver's local connection through
//! the notification sink.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use courier_core::traits::{
    ConnectionHandle, DeliveryHandler, MessageBus, NotificationSink, PresenceDirectory,
    Subscription,
};
use courier_core::{
    ChatRequest, CourierError, Delivery, EventId, MessageEnvelope, NodeId, RefreshPolicy, UserId,
};

use crate::observers::{EnvelopeObserver, ObserverRegistry, ObserverToken};
use crate::refresher::spawn_refresher;
use crate::registry::ConnectionRegistry;

/// Presence timing for one routing service.
#[derive(Debug, Clone)]
pub struct RoutingOptions {
    /// Lifetime of a presence record without refresh.
    pub presence_ttl: Duration,
    /// Cadence of the background re-registration of local users.
    pub refresh_interval: Duration,
    pub refresh_policy: RefreshPolicy,
}

impl Default for RoutingOptions {
    fn default() -> Self {
        Self {
            presence_ttl: Duration::from_secs(300),
            refresh_interval: Duration::from_secs(120),
            refresh_policy: RefreshPolicy::Fixed,
        }
    }
}

/// Routes chat messages for the connections held by one node.
pub struct RoutingService {
    node_id: NodeId,
    presence: Arc<dyn PresenceDirectory>,
    bus: Arc<dyn MessageBus>,
    sink: Arc<dyn NotificationSink>,
    registry: ConnectionRegistry,
    observers: ObserverRegistry,
    options: RoutingOptions,
    subscription: Mutex<Option<Subscription>>,
    background: CancellationToken,
    tasks: TaskTracker,
}

impl RoutingService {
    pub fn new(
        node_id: NodeId,
        presence: Arc<dyn PresenceDirectory>,
        bus: Arc<dyn MessageBus>,
        sink: Arc<dyn NotificationSink>,
        options: RoutingOptions,
    ) -> Self {
        Self {
            node_id,
            presence,
            bus,
            sink,
            registry: ConnectionRegistry::new(),
            observers: ObserverRegistry::new(),
            options,
            subscription: Mutex::new(None),
            background: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn options(&self) -> &RoutingOptions {
        &self.options
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Subscribes to this node's partition and starts the presence refresher.
    pub async fn start(self: &Arc<Self>) -> Result<(), CourierError> {
        let mut subscription = self.subscription.lock().await;
        if subscription.is_some() {
            return Err(CourierError::Internal(format!(
                "routing service for {} already started",
                self.node_id
            )));
        }

        let handler: Arc<dyn DeliveryHandler> = Arc::clone(self) as Arc<dyn DeliveryHandler>;
        *subscription = Some(self.bus.subscribe(&self.node_id, handler).await?);

        spawn_refresher(
            &self.tasks,
            Arc::downgrade(self),
            self.options.refresh_interval,
            self.background.child_token(),
        );

        info!(
            node_id = %self.node_id,
            presence = self.presence.name(),
            bus = self.bus.name(),
            "routing service started"
        );
        Ok(())
    }

    /// Routes one request from `sender` and returns the stamped event id.
    pub async fn send(
        &self,
        sender: &UserId,
        request: ChatRequest,
    ) -> Result<EventId, CourierError> {
        let envelope = MessageEnvelope::new(sender.clone(), request);

        if self.options.refresh_policy == RefreshPolicy::Sliding
            && self.registry.contains(sender).await
        {
            self.refresh_user(sender).await;
        }

        let owner = match self.presence.lookup(&envelope.receiver_user_id).await? {
            Some(node) => node,
            None => {
                debug!(
                    event_id = %envelope.event_id,
                    sender = %sender,
                    receiver = %envelope.receiver_user_id,
                    "receiver has no presence record"
                );
                return Err(CourierError::ReceiverUnreachable {
                    receiver: envelope.receiver_user_id,
                });
            }
        };

        self.bus
            .publish(&owner, &envelope)
            .await
            .map_err(|e| CourierError::DeliveryFailed {
                event_id: envelope.event_id.clone(),
                source: Box::new(e),
            })?;

        debug!(
            event_id = %envelope.event_id,
            sender = %sender,
            receiver = %envelope.receiver_user_id,
            partition_key = %owner,
            "message routed"
        );
        Ok(envelope.event_id)
    }

    /// Hands a consumed envelope to observers and then to the receiver's
    /// local connection, if this node holds one.
    pub async fn deliver(&self, envelope: &MessageEnvelope) -> Result<(), CourierError> {
        self.observers.notify(envelope).await;

        let receiver = &envelope.receiver_user_id;
        let Some(connection) = self.registry.get(receiver).await else {
            debug!(
                event_id = %envelope.event_id,
                user_id = %receiver,
                node_id = %self.node_id,
                "receiver not connected to this node, dropping"
            );
            return Ok(());
        };

        match self.sink.notify(connection.as_ref(), envelope).await {
            Ok(()) => {
                if self.options.refresh_policy == RefreshPolicy::Sliding {
                    self.refresh_user(receiver).await;
                }
                Ok(())
            }
            Err(e) => {
                let connection_id = connection.connection_id().to_string();
                if self.registry.remove_if(receiver, &connection_id).await {
                    connection.close();
                    self.release_presence(receiver).await;
                }
                Err(match e {
                    CourierError::TransportWriteFailed { .. } => e,
                    other => CourierError::TransportWriteFailed {
                        connection_id,
                        message: other.to_string(),
                    },
                })
            }
        }
    }

    /// Binds a newly accepted connection and publishes this node as the
    /// user's owner. The registry entry stays even if presence fails.
    /// Once shutdown has begun the connection is closed and refused.
    pub async fn connect(
        &self,
        user: UserId,
        connection: Arc<dyn ConnectionHandle>,
    ) -> Result<(), CourierError> {
        if self.background.is_cancelled() {
            connection.close();
            return Err(self.stopping());
        }

        let connection_id = connection.connection_id().to_string();
        self.registry.put(user.clone(), Arc::clone(&connection)).await;
        let registered = self
            .presence
            .register(&user, &self.node_id, self.options.presence_ttl)
            .await;

        // Shutdown may have drained the registry while the record was written.
        if self.background.is_cancelled() {
            if self.registry.remove_if(&user, &connection_id).await {
                connection.close();
            }
            self.release_presence(&user).await;
            return Err(self.stopping());
        }
        registered?;

        info!(
            user_id = %user,
            node_id = %self.node_id,
            connection_id = connection_id.as_str(),
            "user connected"
        );
        Ok(())
    }

    /// Unbinds a closed connection. Returns `false` when the user has since
    /// been rebound to another connection, in which case presence is kept.
    pub async fn disconnect(
        &self,
        user: &UserId,
        connection_id: &str,
    ) -> Result<bool, CourierError> {
        if !self.registry.remove_if(user, connection_id).await {
            debug!(user_id = %user, connection_id, "stale disconnect ignored");
            return Ok(false);
        }
        self.unregister_if_owned(user).await?;
        info!(user_id = %user, node_id = %self.node_id, connection_id, "user disconnected");
        Ok(true)
    }

    /// Re-registers every locally held user this node still owns. Returns
    /// how many records were refreshed.
    pub async fn refresh_presence(&self) -> usize {
        let users = self.registry.users().await;
        let mut refreshed = 0;
        for user in &users {
            match self.refresh_owned(user).await {
                Ok(true) => refreshed += 1,
                Ok(false) => {}
                Err(e) => error!(user_id = %user, error = %e, "presence refresh failed"),
            }
        }
        debug!(node_id = %self.node_id, refreshed, total = users.len(), "presence refreshed");
        refreshed
    }

    pub async fn add_observer(&self, observer: Arc<dyn EnvelopeObserver>) -> ObserverToken {
        self.observers.subscribe(observer).await
    }

    pub async fn remove_observer(&self, token: ObserverToken) -> bool {
        self.observers.unsubscribe(token).await
    }

    /// Stops consumption, closes every local connection, withdraws their
    /// presence records and closes the bus.
    pub async fn shutdown(&self) -> Result<(), CourierError> {
        if let Some(subscription) = self.subscription.lock().await.take() {
            subscription.cancel().await;
        }

        self.background.cancel();
        self.tasks.close();
        self.tasks.wait().await;

        let drained = self.registry.drain().await;
        for (user, _) in &drained {
            if let Err(e) = self.unregister_if_owned(user).await {
                warn!(user_id = %user, error = %e, "presence unregister failed during shutdown");
            }
        }

        self.bus.close().await?;
        info!(
            node_id = %self.node_id,
            connections = drained.len(),
            "routing service stopped"
        );
        Ok(())
    }

    async fn refresh_user(&self, user: &UserId) {
        if let Err(e) = self.refresh_owned(user).await {
            warn!(user_id = %user, error = %e, "sliding presence refresh failed");
        }
    }

    /// Re-registers `user` unless the record names another node. A reconnect
    /// elsewhere wins: the local handle is then superseded and dropped.
    async fn refresh_owned(&self, user: &UserId) -> Result<bool, CourierError> {
        match self.presence.lookup(user).await {
            Ok(Some(owner)) if owner != self.node_id => {
                self.drop_superseded(user, &owner).await;
                return Ok(false);
            }
            Ok(_) | Err(CourierError::MalformedPresence { .. }) => {}
            Err(e) => return Err(e),
        }
        self.presence
            .register(user, &self.node_id, self.options.presence_ttl)
            .await?;
        Ok(true)
    }

    async fn drop_superseded(&self, user: &UserId, owner: &NodeId) {
        let Some(connection) = self.registry.get(user).await else {
            return;
        };
        let connection_id = connection.connection_id().to_string();
        if self.registry.remove_if(user, &connection_id).await {
            connection.close();
            info!(
                user_id = %user,
                node_id = %self.node_id,
                %owner,
                connection_id = connection_id.as_str(),
                "user reconnected on another node, local connection dropped"
            );
        }
    }

    fn stopping(&self) -> CourierError {
        CourierError::Internal(format!("routing service for {} is shutting down", self.node_id))
    }

    async fn release_presence(&self, user: &UserId) {
        if let Err(e) = self.unregister_if_owned(user).await {
            warn!(user_id = %user, error = %e, "presence unregister failed");
        }
    }

    /// A user who reconnected elsewhere is owned by that node now; only
    /// remove records that still point here.
    async fn unregister_if_owned(&self, user: &UserId) -> Result<(), CourierError> {
        if !self.presence.unregister_if_owned(user, &self.node_id).await? {
            debug!(user_id = %user, "presence not owned by this node, keeping");
        }
        Ok(())
    }
}

#[async_trait]
impl DeliveryHandler for RoutingService {
    async fn handle(&self, delivery: Delivery) -> Result<(), CourierError> {
        let envelope = MessageEnvelope::decode(&delivery.payload)?;
        self.deliver(&envelope).await
    }
}

#[cfg(test)]
mod tests {
    use courier_bus::MemoryBus;
    use courier_presence::MemoryPresence;
    use courier_test_utils::{FailingBus, MockConnection, RecordingSink};

    use super::*;

    struct Fixture {
        presence: Arc<MemoryPresence>,
        bus: Arc<MemoryBus>,
        sink: Arc<RecordingSink>,
        service: Arc<RoutingService>,
    }

    fn fixture(node: &str, options: RoutingOptions) -> Fixture {
        let presence = Arc::new(MemoryPresence::new());
        let bus = Arc::new(MemoryBus::new());
        let sink = Arc::new(RecordingSink::new());
        let service = Arc::new(RoutingService::new(
            node.into(),
            presence.clone(),
            bus.clone(),
            sink.clone(),
            options,
        ));
        Fixture {
            presence,
            bus,
            sink,
            service,
        }
    }

    fn request(to: &str, body: &str) -> ChatRequest {
        ChatRequest {
            chat_id: "c1".into(),
            receiver_user_id: to.into(),
            message_type: "text".into(),
            message: body.into(),
        }
    }

    #[tokio::test]
    async fn send_without_presence_is_unreachable_and_publishes_nothing() {
        let f = fixture("node-a", RoutingOptions::default());
        let err = f
            .service
            .send(&"bob".into(), request("alice", "hi"))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CourierError::ReceiverUnreachable { ref receiver } if receiver.as_str() == "alice"
        ));
        assert_eq!(f.bus.publish_count(), 0);
    }

    #[tokio::test]
    async fn send_publishes_under_owner_partition() {
        let f = fixture("node-b", RoutingOptions::default());
        f.presence
            .register(&"alice".into(), &"node-a".into(), Duration::from_secs(300))
            .await
            .unwrap();

        f.service.send(&"bob".into(), request("alice", "hi")).await.unwrap();

        assert_eq!(f.bus.published_to(&"node-a".into()), 1);
        assert_eq!(f.bus.published_to(&"node-b".into()), 0);
    }

    #[tokio::test]
    async fn publish_failure_is_delivery_failed_with_event_id() {
        let presence = Arc::new(MemoryPresence::new());
        presence
            .register(&"alice".into(), &"node-a".into(), Duration::from_secs(300))
            .await
            .unwrap();
        let bus = Arc::new(FailingBus::new());
        let service = RoutingService::new(
            "node-b".into(),
            presence,
            bus.clone(),
            Arc::new(RecordingSink::new()),
            RoutingOptions::default(),
        );

        let err = service.send(&"bob".into(), request("alice", "hi")).await.unwrap_err();
        assert_eq!(err.kind(), "delivery_failed");
        assert_eq!(bus.publish_attempts(), 1);

        let err = service.send(&"bob".into(), request("carol", "hi")).await.unwrap_err();
        assert_eq!(err.kind(), "receiver_unreachable");
        assert_eq!(bus.publish_attempts(), 1, "unreachable receivers are never published");
    }

    #[tokio::test]
    async fn deliver_writes_to_local_connection() {
        let f = fixture("node-a", RoutingOptions::default());
        let alice = MockConnection::new("conn-alice");
        f.service.connect("alice".into(), alice.clone()).await.unwrap();

        let envelope = MessageEnvelope::new("bob".into(), request("alice", "hi"));
        f.service.deliver(&envelope).await.unwrap();

        let received = alice.notifications();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].sender.as_str(), "bob");
        assert_eq!(received[0].event_id, envelope.event_id);
        assert_eq!(f.sink.delivered().len(), 1);
    }

    #[tokio::test]
    async fn deliver_to_unknown_receiver_is_dropped() {
        let f = fixture("node-a", RoutingOptions::default());
        let envelope = MessageEnvelope::new("bob".into(), request("carol", "hi"));
        f.service.deliver(&envelope).await.unwrap();
        assert!(f.sink.delivered().is_empty());
    }

    #[tokio::test]
    async fn write_failure_evicts_connection_and_presence() {
        let f = fixture("node-a", RoutingOptions::default());
        let alice = MockConnection::new("conn-alice");
        f.service.connect("alice".into(), alice.clone()).await.unwrap();
        alice.fail_writes(true);

        let envelope = MessageEnvelope::new("bob".into(), request("alice", "hi"));
        let err = f.service.deliver(&envelope).await.unwrap_err();

        assert_eq!(err.kind(), "transport_write_failed");
        assert!(f.service.registry().is_empty().await);
        assert_eq!(alice.close_count(), 1);
        assert_eq!(f.presence.lookup(&"alice".into()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn malformed_delivery_is_rejected() {
        let f = fixture("node-a", RoutingOptions::default());
        let err = f
            .service
            .handle(Delivery {
                partition_key: "node-a".into(),
                delivery_id: "0".into(),
                payload: b"not an envelope".to_vec(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CourierError::MalformedEnvelope { .. }));
    }

    #[tokio::test]
    async fn stale_disconnect_keeps_reconnected_user() {
        let f = fixture("node-a", RoutingOptions::default());
        f.service
            .connect("alice".into(), MockConnection::new("old"))
            .await
            .unwrap();
        f.service
            .connect("alice".into(), MockConnection::new("new"))
            .await
            .unwrap();

        assert!(!f.service.disconnect(&"alice".into(), "old").await.unwrap());
        assert!(f.service.registry().contains(&"alice".into()).await);
        assert_eq!(
            f.presence.lookup(&"alice".into()).await.unwrap(),
            Some("node-a".into())
        );

        assert!(f.service.disconnect(&"alice".into(), "new").await.unwrap());
        assert_eq!(f.presence.lookup(&"alice".into()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn disconnect_keeps_presence_owned_by_another_node() {
        let f = fixture("node-a", RoutingOptions::default());
        f.service
            .connect("alice".into(), MockConnection::new("c1"))
            .await
            .unwrap();
        f.presence
            .register(&"alice".into(), &"node-b".into(), Duration::from_secs(300))
            .await
            .unwrap();

        assert!(f.service.disconnect(&"alice".into(), "c1").await.unwrap());
        assert_eq!(
            f.presence.lookup(&"alice".into()).await.unwrap(),
            Some("node-b".into())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn sliding_policy_refreshes_sender_on_send() {
        let options = RoutingOptions {
            presence_ttl: Duration::from_secs(60),
            refresh_interval: Duration::from_secs(30),
            refresh_policy: RefreshPolicy::Sliding,
        };
        let f = fixture("node-a", options);
        f.service
            .connect("bob".into(), MockConnection::new("conn-bob"))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(50)).await;
        let _ = f.service.send(&"bob".into(), request("nobody", "hi")).await;
        tokio::time::advance(Duration::from_secs(50)).await;

        assert_eq!(
            f.presence.lookup(&"bob".into()).await.unwrap(),
            Some("node-a".into())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_policy_does_not_refresh_on_send() {
        let options = RoutingOptions {
            presence_ttl: Duration::from_secs(60),
            refresh_interval: Duration::from_secs(30),
            refresh_policy: RefreshPolicy::Fixed,
        };
        let f = fixture("node-a", options);
        f.service
            .connect("bob".into(), MockConnection::new("conn-bob"))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(50)).await;
        let _ = f.service.send(&"bob".into(), request("nobody", "hi")).await;
        tokio::time::advance(Duration::from_secs(50)).await;

        assert_eq!(f.presence.lookup(&"bob".into()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn refresh_presence_reregisters_local_users() {
        let f = fixture("node-a", RoutingOptions::default());
        f.service
            .connect("alice".into(), MockConnection::new("a"))
            .await
            .unwrap();
        f.service
            .connect("bob".into(), MockConnection::new("b"))
            .await
            .unwrap();
        f.presence.unregister(&"alice".into()).await.unwrap();

        assert_eq!(f.service.refresh_presence().await, 2);
        assert_eq!(
            f.presence.lookup(&"alice".into()).await.unwrap(),
            Some("node-a".into())
        );
    }

    #[tokio::test]
    async fn refresh_presence_skips_user_owned_elsewhere() {
        let f = fixture("node-a", RoutingOptions::default());
        let old = MockConnection::new("old");
        f.service.connect("alice".into(), old.clone()).await.unwrap();
        f.presence
            .register(&"alice".into(), &"node-b".into(), Duration::from_secs(300))
            .await
            .unwrap();

        assert_eq!(f.service.refresh_presence().await, 0);
        assert_eq!(
            f.presence.lookup(&"alice".into()).await.unwrap(),
            Some("node-b".into())
        );
        assert_eq!(old.close_count(), 1);
        assert!(f.service.registry().is_empty().await);
    }

    #[tokio::test]
    async fn connect_after_shutdown_is_refused() {
        let f = fixture("node-a", RoutingOptions::default());
        f.service.start().await.unwrap();
        f.service.shutdown().await.unwrap();

        let late = MockConnection::new("late");
        let err = f.service.connect("late".into(), late.clone()).await.unwrap_err();

        assert_eq!(err.kind(), "internal");
        assert_eq!(late.close_count(), 1);
        assert_eq!(f.presence.lookup(&"late".into()).await.unwrap(), None);
        assert!(f.service.registry().is_empty().await);
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let f = fixture("node-a", RoutingOptions::default());
        f.service.start().await.unwrap();
        assert!(f.service.start().await.is_err());
        f.service.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_closes_connections_and_withdraws_presence() {
        let f = fixture("node-a", RoutingOptions::default());
        f.service.start().await.unwrap();
        let alice = MockConnection::new("a");
        let bob = MockConnection::new("b");
        f.service.connect("alice".into(), alice.clone()).await.unwrap();
        f.service.connect("bob".into(), bob.clone()).await.unwrap();

        f.service.shutdown().await.unwrap();

        assert_eq!(alice.close_count(), 1);
        assert_eq!(bob.close_count(), 1);
        assert!(f.presence.is_empty());
        assert!(f.service.registry().is_empty().await);
    }
}

// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-process partitioned bus.
//!
//! Each partition key owns an unbounded queue. Messages published before a
//! subscriber binds wait in the queue, so a node that subscribes late still
//! sees everything addressed to it. Only one subscriber may hold a key at a
//! time; when its loop stops the queue is handed back for the next one.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info};

use courier_core::traits::{BackendAdapter, DeliveryHandler, MessageBus, Subscription};
use courier_core::{CourierError, Delivery, HealthStatus, MessageEnvelope, NodeId};

use crate::dispatch::dispatch;

struct Partition {
    tx: mpsc::UnboundedSender<Delivery>,
    /// `None` while a subscription loop owns the receiver.
    rx: Option<mpsc::UnboundedReceiver<Delivery>>,
    next_offset: u64,
}

impl Partition {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Some(rx),
            next_offset: 0,
        }
    }
}

/// Message bus that lives entirely inside one process.
pub struct MemoryBus {
    partitions: Arc<DashMap<NodeId, Partition>>,
    published: AtomicU64,
    closed: AtomicBool,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self {
            partitions: Arc::new(DashMap::new()),
            published: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    /// Total number of successful publishes across all keys.
    pub fn publish_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Number of messages ever published under `key`.
    pub fn published_to(&self, key: &NodeId) -> u64 {
        self.partitions.get(key).map(|p| p.next_offset).unwrap_or(0)
    }

    fn ensure_open(&self) -> Result<(), CourierError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CourierError::Bus {
                message: "bus is closed".to_string(),
                source: None,
            });
        }
        Ok(())
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BackendAdapter for MemoryBus {
    fn name(&self) -> &str {
        "memory"
    }

    async fn health_check(&self) -> Result<HealthStatus, CourierError> {
        if self.closed.load(Ordering::Acquire) {
            Ok(HealthStatus::Unhealthy("bus closed".to_string()))
        } else {
            Ok(HealthStatus::Healthy)
        }
    }
}

#[async_trait]
impl MessageBus for MemoryBus {
    async fn publish(
        &self,
        partition_key: &NodeId,
        envelope: &MessageEnvelope,
    ) -> Result<(), CourierError> {
        self.ensure_open()?;
        let payload = envelope.encode()?;

        let mut partition = self
            .partitions
            .entry(partition_key.clone())
            .or_insert_with(Partition::new);
        let offset = partition.next_offset;
        partition
            .tx
            .send(Delivery {
                partition_key: partition_key.clone(),
                delivery_id: offset.to_string(),
                payload,
            })
            .map_err(|_| CourierError::Bus {
                message: format!("partition {partition_key} queue is gone"),
                source: None,
            })?;
        partition.next_offset += 1;
        drop(partition);

        self.published.fetch_add(1, Ordering::Relaxed);
        debug!(%partition_key, event_id = %envelope.event_id, offset, "envelope published");
        Ok(())
    }

    async fn subscribe(
        &self,
        partition_key: &NodeId,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<Subscription, CourierError> {
        self.ensure_open()?;

        let rx = self
            .partitions
            .entry(partition_key.clone())
            .or_insert_with(Partition::new)
            .rx
            .take()
            .ok_or_else(|| CourierError::Bus {
                message: format!("partition {partition_key} already has an active subscriber"),
                source: None,
            })?;

        let cancel = self.shutdown.child_token();
        let task = self.tasks.spawn(run_partition(
            Arc::clone(&self.partitions),
            partition_key.clone(),
            rx,
            handler,
            cancel.clone(),
        ));

        info!(%partition_key, "memory bus subscription started");
        Ok(Subscription::new(partition_key.clone(), cancel, task))
    }

    async fn close(&self) -> Result<(), CourierError> {
        self.closed.store(true, Ordering::Release);
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        info!("memory bus closed");
        Ok(())
    }
}

async fn run_partition(
    partitions: Arc<DashMap<NodeId, Partition>>,
    partition_key: NodeId,
    mut rx: mpsc::UnboundedReceiver<Delivery>,
    handler: Arc<dyn DeliveryHandler>,
    cancel: CancellationToken,
) {
    loop {
        let delivery = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(delivery) => delivery,
                None => break,
            },
        };
        dispatch(handler.as_ref(), delivery).await;
    }

    if let Some(mut partition) = partitions.get_mut(&partition_key) {
        partition.rx = Some(rx);
    }
    debug!(%partition_key, "memory bus subscription stopped");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use courier_core::{ChatRequest, UserId};
    use tokio::sync::{Mutex, Notify};

    use super::*;

    #[derive(Default)]
    struct Collector {
        seen: Mutex<Vec<MessageEnvelope>>,
    }

    #[async_trait]
    impl DeliveryHandler for Collector {
        async fn handle(&self, delivery: Delivery) -> Result<(), CourierError> {
            let envelope = MessageEnvelope::decode(&delivery.payload)?;
            if envelope.message == "panic" {
                panic!("handler blew up");
            }
            self.seen.lock().await.push(envelope);
            Ok(())
        }
    }

    impl Collector {
        async fn messages(&self) -> Vec<String> {
            self.seen.lock().await.iter().map(|e| e.message.clone()).collect()
        }
    }

    /// Holds the "block" delivery until released.
    #[derive(Default)]
    struct Gate {
        started: Notify,
        release: Notify,
        completed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DeliveryHandler for Gate {
        async fn handle(&self, delivery: Delivery) -> Result<(), CourierError> {
            let envelope = MessageEnvelope::decode(&delivery.payload)?;
            if envelope.message == "block" {
                self.started.notify_one();
                self.release.notified().await;
            }
            self.completed.lock().await.push(envelope.message);
            Ok(())
        }
    }

    impl Gate {
        async fn completed(&self) -> Vec<String> {
            self.completed.lock().await.clone()
        }
    }

    fn envelope(to: &str, body: &str) -> MessageEnvelope {
        MessageEnvelope::new(
            UserId::from("bob"),
            ChatRequest {
                chat_id: "c1".into(),
                receiver_user_id: to.into(),
                message_type: "text".into(),
                message: body.into(),
            },
        )
    }

    async fn settle() {
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn subscriber_sees_only_its_own_key() {
        let bus = MemoryBus::new();
        let a = Arc::new(Collector::default());
        let b = Arc::new(Collector::default());
        let _sa = bus.subscribe(&"node-a".into(), a.clone()).await.unwrap();
        let _sb = bus.subscribe(&"node-b".into(), b.clone()).await.unwrap();

        bus.publish(&"node-a".into(), &envelope("alice", "for a")).await.unwrap();
        settle().await;

        assert_eq!(a.messages().await, vec!["for a"]);
        assert!(b.messages().await.is_empty());
        assert_eq!(bus.published_to(&"node-a".into()), 1);
        assert_eq!(bus.published_to(&"node-b".into()), 0);
    }

    #[tokio::test]
    async fn deliveries_arrive_in_publish_order() {
        let bus = MemoryBus::new();
        let a = Arc::new(Collector::default());
        let _sub = bus.subscribe(&"node-a".into(), a.clone()).await.unwrap();

        for i in 0..20 {
            bus.publish(&"node-a".into(), &envelope("alice", &i.to_string()))
                .await
                .unwrap();
        }
        settle().await;

        let expected: Vec<String> = (0..20).map(|i| i.to_string()).collect();
        assert_eq!(a.messages().await, expected);
    }

    #[tokio::test]
    async fn messages_published_before_subscribe_are_retained() {
        let bus = MemoryBus::new();
        bus.publish(&"node-a".into(), &envelope("alice", "early")).await.unwrap();

        let a = Arc::new(Collector::default());
        let _sub = bus.subscribe(&"node-a".into(), a.clone()).await.unwrap();
        settle().await;
        assert_eq!(a.messages().await, vec!["early"]);
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn failing_and_panicking_handlers_do_not_stop_the_loop() {
        let bus = MemoryBus::new();
        let a = Arc::new(Collector::default());
        let sub = bus.subscribe(&"node-a".into(), a.clone()).await.unwrap();

        bus.publish(&"node-a".into(), &envelope("alice", "first")).await.unwrap();
        bus.publish(&"node-a".into(), &envelope("alice", "panic")).await.unwrap();
        bus.publish(&"node-a".into(), &envelope("alice", "second")).await.unwrap();
        settle().await;

        assert_eq!(a.messages().await, vec!["first", "second"]);
        assert!(!sub.is_finished());
        assert!(logs_contain("delivery handler panicked"));
    }

    #[tokio::test]
    async fn second_subscriber_on_same_key_is_rejected() {
        let bus = MemoryBus::new();
        let _first = bus
            .subscribe(&"node-a".into(), Arc::new(Collector::default()))
            .await
            .unwrap();
        let second = bus
            .subscribe(&"node-a".into(), Arc::new(Collector::default()))
            .await;
        assert!(matches!(second, Err(CourierError::Bus { .. })));
    }

    #[tokio::test]
    async fn cancelled_subscription_hands_queue_to_next_subscriber() {
        let bus = MemoryBus::new();
        let first = bus
            .subscribe(&"node-a".into(), Arc::new(Collector::default()))
            .await
            .unwrap();
        first.cancel().await;

        bus.publish(&"node-a".into(), &envelope("alice", "later")).await.unwrap();
        let next = Arc::new(Collector::default());
        let _sub = bus.subscribe(&"node-a".into(), next.clone()).await.unwrap();
        settle().await;
        assert_eq!(next.messages().await, vec!["later"]);
    }

    #[tokio::test]
    async fn cancel_waits_for_running_handler_and_stops_dispatch() {
        let bus = MemoryBus::new();
        let gate = Arc::new(Gate::default());
        let sub = bus.subscribe(&"node-a".into(), gate.clone()).await.unwrap();
        bus.publish(&"node-a".into(), &envelope("alice", "block")).await.unwrap();
        bus.publish(&"node-a".into(), &envelope("alice", "after")).await.unwrap();
        gate.started.notified().await;

        let cancelling = tokio::spawn(sub.cancel());
        settle().await;
        assert!(!cancelling.is_finished(), "cancel returned while a handler was running");

        gate.release.notify_one();
        tokio::time::timeout(Duration::from_secs(2), cancelling)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(gate.completed().await, vec!["block"]);

        // The undispatched delivery stays queued for the next subscriber.
        let next = Arc::new(Collector::default());
        let _sub = bus.subscribe(&"node-a".into(), next.clone()).await.unwrap();
        settle().await;
        assert_eq!(next.messages().await, vec!["after"]);
        assert_eq!(gate.completed().await, vec!["block"]);
    }

    #[tokio::test]
    async fn close_waits_for_running_handler() {
        let bus = Arc::new(MemoryBus::new());
        let gate = Arc::new(Gate::default());
        let sub = bus.subscribe(&"node-a".into(), gate.clone()).await.unwrap();
        bus.publish(&"node-a".into(), &envelope("alice", "block")).await.unwrap();
        bus.publish(&"node-a".into(), &envelope("alice", "after")).await.unwrap();
        gate.started.notified().await;

        let closing = tokio::spawn({
            let bus = Arc::clone(&bus);
            async move { bus.close().await }
        });
        settle().await;
        assert!(!closing.is_finished(), "close returned while a handler was running");

        gate.release.notify_one();
        tokio::time::timeout(Duration::from_secs(2), closing)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(sub.is_finished());
        assert_eq!(gate.completed().await, vec!["block"]);
    }

    #[tokio::test]
    async fn close_stops_loops_and_rejects_publish() {
        let bus = MemoryBus::new();
        let sub = bus
            .subscribe(&"node-a".into(), Arc::new(Collector::default()))
            .await
            .unwrap();
        bus.close().await.unwrap();

        assert!(sub.is_finished());
        let err = bus.publish(&"node-a".into(), &envelope("alice", "x")).await;
        assert!(matches!(err, Err(CourierError::Bus { .. })));
        assert!(matches!(
            bus.health_check().await.unwrap(),
            HealthStatus::Unhealthy(_)
        ));
        assert_eq!(bus.publish_count(), 0);
    }
}

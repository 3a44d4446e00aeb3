// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Redis Streams message bus.
//!
//! Every partition key gets its own stream, `<topic>:<node_id>`, consumed
//! through one consumer group shared by all nodes. A node only ever reads the
//! stream named after itself, so the group gives at-least-once delivery and
//! replay of unacknowledged entries after a restart. Entries are acknowledged
//! once the handler returns, whatever its outcome.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamId, StreamReadReply};
use redis::IntoConnectionInfo;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use courier_core::traits::{BackendAdapter, DeliveryHandler, MessageBus, Subscription};
use courier_core::{CourierError, Delivery, HealthStatus, MessageEnvelope, NodeId, StartOffset};

use crate::dispatch::dispatch;

/// Stream entry field holding the encoded envelope.
const ENVELOPE_FIELD: &str = "envelope";

/// XREADGROUP id that asks for entries never delivered to any consumer.
const NEW_ENTRIES: &str = ">";

const INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Connection and consumption settings for [`RedisStreamBus`].
#[derive(Clone)]
pub struct RedisStreamSettings {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Prefix of every partition stream name.
    pub topic: String,
    pub group_id: String,
    /// Where a newly created group starts reading.
    pub start_offset: StartOffset,
    /// How long one XREADGROUP call waits for new entries.
    pub block: Duration,
    /// Maximum entries fetched per read.
    pub batch_size: usize,
    pub publish_timeout: Duration,
    /// Approximate stream length cap applied on publish; zero disables trimming.
    pub max_len: usize,
}

impl std::fmt::Debug for RedisStreamSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStreamSettings")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[redacted]"))
            .field("topic", &self.topic)
            .field("group_id", &self.group_id)
            .field("start_offset", &self.start_offset)
            .field("block", &self.block)
            .field("batch_size", &self.batch_size)
            .field("publish_timeout", &self.publish_timeout)
            .field("max_len", &self.max_len)
            .finish()
    }
}

/// Message bus backed by one Redis stream per partition key.
pub struct RedisStreamBus {
    client: redis::Client,
    conn: MultiplexedConnection,
    settings: RedisStreamSettings,
    closed: AtomicBool,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl RedisStreamBus {
    pub async fn connect(settings: RedisStreamSettings) -> Result<Self, CourierError> {
        let mut info = settings
            .url
            .as_str()
            .into_connection_info()
            .map_err(|e| CourierError::bus(format!("invalid bus url {}", settings.url), e))?;
        if settings.username.is_some() {
            info.redis.username = settings.username.clone();
        }
        if settings.password.is_some() {
            info.redis.password = settings.password.clone();
        }

        let client = redis::Client::open(info)
            .map_err(|e| CourierError::bus("failed to create bus client", e))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| CourierError::bus("failed to connect to message bus", e))?;

        info!(
            url = settings.url.as_str(),
            topic = settings.topic.as_str(),
            group_id = settings.group_id.as_str(),
            "connected to redis stream bus"
        );
        Ok(Self {
            client,
            conn,
            settings,
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        })
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

pub(crate) fn stream_key(topic: &str, partition_key: &NodeId) -> String {
    format!("{topic}:{partition_key}")
}

fn group_start_id(offset: StartOffset) -> &'static str {
    match offset {
        StartOffset::Earliest => "0",
        StartOffset::Latest => "$",
    }
}

/// Creates the consumer group (and the stream) unless it already exists.
async fn ensure_group(
    conn: &mut MultiplexedConnection,
    key: &str,
    group: &str,
    offset: StartOffset,
) -> Result<(), CourierError> {
    let created = redis::cmd("XGROUP")
        .arg("CREATE")
        .arg(key)
        .arg(group)
        .arg(group_start_id(offset))
        .arg("MKSTREAM")
        .query_async::<()>(conn)
        .await;

    match created {
        Ok(()) => {
            info!(stream = key, group, %offset, "consumer group created");
            Ok(())
        }
        Err(e) if e.code() == Some("BUSYGROUP") => {
            debug!(stream = key, group, "consumer group already exists");
            Ok(())
        }
        Err(e) => Err(CourierError::bus(
            format!("failed to create consumer group {group} on {key}"),
            e,
        )),
    }
}

#[async_trait]
impl BackendAdapter for RedisStreamBus {
    fn name(&self) -> &str {
        "redis"
    }

    async fn health_check(&self) -> Result<HealthStatus, CourierError> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(HealthStatus::Unhealthy("bus closed".to_string()));
        }
        let mut conn = self.conn.clone();
        match redis::cmd("PING").query_async::<String>(&mut conn).await {
            Ok(_) => Ok(HealthStatus::Healthy),
            Err(e) => Ok(HealthStatus::Unhealthy(format!("message bus: {e}"))),
        }
    }
}

#[async_trait]
impl MessageBus for RedisStreamBus {
    async fn publish(
        &self,
        partition_key: &NodeId,
        envelope: &MessageEnvelope,
    ) -> Result<(), CourierError> {
        self.ensure_open()?;
        let payload = envelope.encode()?;
        let key = stream_key(&self.settings.topic, partition_key);

        let mut cmd = redis::cmd("XADD");
        cmd.arg(&key);
        if self.settings.max_len > 0 {
            cmd.arg("MAXLEN").arg("~").arg(self.settings.max_len);
        }
        cmd.arg("*").arg(ENVELOPE_FIELD).arg(payload);

        let mut conn = self.conn.clone();
        let timeout = self.settings.publish_timeout;
        let published = tokio::time::timeout(timeout, cmd.query_async::<String>(&mut conn)).await;
        let entry_id = match published {
            Ok(Ok(id)) => id,
            Ok(Err(e)) => return Err(CourierError::bus(format!("publish to {key} failed"), e)),
            Err(_) => {
                return Err(CourierError::Bus {
                    message: format!("publish to {key} timed out after {timeout:?}"),
                    source: None,
                });
            }
        };

        debug!(
            stream = key.as_str(),
            event_id = %envelope.event_id,
            entry_id = entry_id.as_str(),
            "envelope published"
        );
        Ok(())
    }

    async fn subscribe(
        &self,
        partition_key: &NodeId,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<Subscription, CourierError> {
        self.ensure_open()?;
        let key = stream_key(&self.settings.topic, partition_key);

        // Blocking reads get their own connection so they never stall publishes.
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| CourierError::bus("failed to open subscription connection", e))?;
        ensure_group(&mut conn, &key, &self.settings.group_id, self.settings.start_offset).await?;

        let cancel = self.shutdown.child_token();
        let worker = StreamWorker {
            conn,
            key: key.clone(),
            group: self.settings.group_id.clone(),
            consumer: partition_key.to_string(),
            partition_key: partition_key.clone(),
            block_ms: u64::try_from(self.settings.block.as_millis()).unwrap_or(u64::MAX),
            batch_size: self.settings.batch_size.max(1),
            handler,
        };
        let task = self.tasks.spawn(worker.run(cancel.clone()));

        info!(stream = key.as_str(), %partition_key, "redis stream subscription started");
        Ok(Subscription::new(partition_key.clone(), cancel, task))
    }

    async fn close(&self) -> Result<(), CourierError> {
        self.closed.store(true, Ordering::Release);
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        info!("redis stream bus closed");
        Ok(())
    }
}

/// Reads one partition stream and feeds its entries to the handler.
struct StreamWorker {
    conn: MultiplexedConnection,
    key: String,
    group: String,
    consumer: String,
    partition_key: NodeId,
    block_ms: u64,
    batch_size: usize,
    handler: Arc<dyn DeliveryHandler>,
}

impl StreamWorker {
    async fn run(mut self, cancel: CancellationToken) {
        // Start with entries delivered to this consumer but never acknowledged.
        let mut cursor = String::from("0");
        let mut backoff = INITIAL_BACKOFF;

        'outer: loop {
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                read = self.read(&cursor) => read,
            };

            let entries = match read {
                Ok(entries) => {
                    backoff = INITIAL_BACKOFF;
                    entries
                }
                Err(e) => {
                    error!(
                        stream = self.key.as_str(),
                        error = %e,
                        retry_in = ?backoff,
                        "stream read failed"
                    );
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                    continue;
                }
            };

            if cursor != NEW_ENTRIES {
                match entries.last() {
                    Some(last) => cursor = last.id.clone(),
                    None => {
                        debug!(stream = self.key.as_str(), "pending replay complete");
                        cursor = NEW_ENTRIES.to_string();
                        continue;
                    }
                }
            }

            for entry in entries {
                if cancel.is_cancelled() {
                    break 'outer;
                }
                self.process(entry).await;
            }
        }

        debug!(stream = self.key.as_str(), "redis stream subscription stopped");
    }

    async fn read(&mut self, cursor: &str) -> Result<Vec<StreamId>, redis::RedisError> {
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(&self.group)
            .arg(&self.consumer)
            .arg("COUNT")
            .arg(self.batch_size);
        if cursor == NEW_ENTRIES {
            cmd.arg("BLOCK").arg(self.block_ms);
        }
        cmd.arg("STREAMS").arg(&self.key).arg(cursor);

        let reply: Option<StreamReadReply> = cmd.query_async(&mut self.conn).await?;
        Ok(reply
            .map(|r| r.keys.into_iter().flat_map(|k| k.ids).collect())
            .unwrap_or_default())
    }

    async fn process(&mut self, entry: StreamId) {
        match entry.get::<Vec<u8>>(ENVELOPE_FIELD) {
            Some(payload) => {
                let delivery = Delivery {
                    partition_key: self.partition_key.clone(),
                    delivery_id: entry.id.clone(),
                    payload,
                };
                dispatch(self.handler.as_ref(), delivery).await;
            }
            None => warn!(
                stream = self.key.as_str(),
                entry_id = entry.id.as_str(),
                "stream entry has no envelope field"
            ),
        }

        let acked = redis::cmd("XACK")
            .arg(&self.key)
            .arg(&self.group)
            .arg(&entry.id)
            .query_async::<i64>(&mut self.conn)
            .await;
        if let Err(e) = acked {
            warn!(
                stream = self.key.as_str(),
                entry_id = entry.id.as_str(),
                error = %e,
                "ack failed, entry will be redelivered"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use courier_core::{ChatRequest, UserId};
    use tokio::sync::Mutex;

    use super::*;

    #[test]
    fn stream_key_joins_topic_and_node() {
        assert_eq!(stream_key("chat-message", &"node-a".into()), "chat-message:node-a");
    }

    #[test]
    fn group_start_follows_offset() {
        assert_eq!(group_start_id(StartOffset::Earliest), "0");
        assert_eq!(group_start_id(StartOffset::Latest), "$");
    }

    fn settings(url: String, topic: String) -> RedisStreamSettings {
        RedisStreamSettings {
            url,
            username: None,
            password: None,
            topic,
            group_id: "chat-group".into(),
            start_offset: StartOffset::Earliest,
            block: Duration::from_millis(200),
            batch_size: 16,
            publish_timeout: Duration::from_secs(2),
            max_len: 1000,
        }
    }

    #[test]
    fn settings_debug_redacts_password() {
        let mut s = settings("redis://127.0.0.1:6379".into(), "chat".into());
        s.password = Some("hunter2".into());
        let debug = format!("{s:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("chat-group"));
    }

    #[derive(Default)]
    struct Collector {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl DeliveryHandler for Collector {
        async fn handle(&self, delivery: Delivery) -> Result<(), CourierError> {
            let envelope = MessageEnvelope::decode(&delivery.payload)?;
            self.seen.lock().await.push(envelope.message);
            Ok(())
        }
    }

    fn envelope(body: &str) -> MessageEnvelope {
        MessageEnvelope::new(
            UserId::from("bob"),
            ChatRequest {
                chat_id: "c1".into(),
                receiver_user_id: "alice".into(),
                message_type: "text".into(),
                message: body.into(),
            },
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    #[ignore = "requires a running redis at COURIER_TEST_REDIS_URL"]
    async fn redis_publish_reaches_only_the_keyed_subscriber() {
        let Ok(url) = std::env::var("COURIER_TEST_REDIS_URL") else {
            return;
        };
        let topic = format!("courier-test-{}", uuid::Uuid::new_v4().simple());
        let bus = RedisStreamBus::connect(settings(url, topic)).await.unwrap();

        bus.publish(&"node-a".into(), &envelope("early")).await.unwrap();

        let a = Arc::new(Collector::default());
        let b = Arc::new(Collector::default());
        let _sa = bus.subscribe(&"node-a".into(), a.clone()).await.unwrap();
        let _sb = bus.subscribe(&"node-b".into(), b.clone()).await.unwrap();

        bus.publish(&"node-a".into(), &envelope("late")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(800)).await;

        assert_eq!(*a.seen.lock().await, vec!["early", "late"]);
        assert!(b.seen.lock().await.is_empty());

        bus.close().await.unwrap();
        assert!(bus.publish(&"node-a".into(), &envelope("x")).await.is_err());
    }
}

// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Redis-backed presence directory.
//!
//! Each user maps to one string key holding a JSON [`PresenceRecord`]. The
//! key carries a Redis expiry equal to the presence TTL, so records written by
//! a crashed node disappear on their own.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::IntoConnectionInfo;
use tracing::{debug, warn};

use courier_core::traits::{BackendAdapter, PresenceDirectory};
use courier_core::{CourierError, HealthStatus, NodeId, PresenceRecord, UserId};

/// Connection settings for [`RedisPresence`].
#[derive(Clone)]
pub struct RedisPresenceSettings {
    /// `redis://host:port/db` URL.
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Prepended to the user id to form the key.
    pub key_prefix: String,
}

impl std::fmt::Debug for RedisPresenceSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisPresenceSettings")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[redacted]"))
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

/// Deletes the key only while its record names `ARGV[1]` as owner, or when
/// the value is not a JSON object at all.
const RELEASE_IF_OWNED: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then
    return 0
end
local ok, record = pcall(cjson.decode, raw)
if ok and type(record) == 'table' then
    local owner = record['node_id'] or record['server_id']
    if type(owner) == 'string' and owner ~= '' and owner ~= ARGV[1] then
        return 0
    end
end
return redis.call('DEL', KEYS[1])
"#;

/// Presence directory stored in Redis.
pub struct RedisPresence {
    conn: MultiplexedConnection,
    key_prefix: String,
    release: redis::Script,
}

impl RedisPresence {
    /// Opens a multiplexed connection to the presence store.
    pub async fn connect(settings: &RedisPresenceSettings) -> Result<Self, CourierError> {
        let mut info = settings
            .url
            .as_str()
            .into_connection_info()
            .map_err(|e| {
                CourierError::presence(format!("invalid presence url {}", settings.url), e)
            })?;
        if settings.username.is_some() {
            info.redis.username = settings.username.clone();
        }
        if settings.password.is_some() {
            info.redis.password = settings.password.clone();
        }

        let client = redis::Client::open(info)
            .map_err(|e| CourierError::presence("failed to create presence client", e))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| CourierError::presence("failed to connect to presence store", e))?;

        debug!(url = settings.url.as_str(), "connected to redis presence store");
        Ok(Self {
            conn,
            key_prefix: settings.key_prefix.clone(),
            release: redis::Script::new(RELEASE_IF_OWNED),
        })
    }

    fn key(&self, user: &UserId) -> String {
        presence_key(&self.key_prefix, user)
    }
}

pub(crate) fn presence_key(prefix: &str, user: &UserId) -> String {
    format!("{prefix}{user}")
}

/// Owner named by a stored value. Expiry is enforced by the key's `PX`; the
/// stored `expires_at` was stamped by the writer's clock and is not compared.
pub(crate) fn stored_owner(user: &UserId, raw: &str) -> Result<NodeId, CourierError> {
    PresenceRecord::decode(user, raw).map(|record| record.node_id)
}

/// Redis `PX` argument; sub-millisecond TTLs still get a key that expires.
pub(crate) fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl BackendAdapter for RedisPresence {
    fn name(&self) -> &str {
        "redis"
    }

    async fn health_check(&self) -> Result<HealthStatus, CourierError> {
        let mut conn = self.conn.clone();
        match redis::cmd("PING").query_async::<String>(&mut conn).await {
            Ok(_) => Ok(HealthStatus::Healthy),
            Err(e) => Ok(HealthStatus::Unhealthy(format!("presence store: {e}"))),
        }
    }
}

#[async_trait]
impl PresenceDirectory for RedisPresence {
    async fn register(
        &self,
        user: &UserId,
        node: &NodeId,
        ttl: Duration,
    ) -> Result<(), CourierError> {
        let record = PresenceRecord::new(user.clone(), node.clone(), ttl);
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(self.key(user))
            .arg(record.encode()?)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| CourierError::presence(format!("register {user} failed"), e))
    }

    async fn unregister(&self, user: &UserId) -> Result<(), CourierError> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL")
            .arg(self.key(user))
            .query_async::<()>(&mut conn)
            .await
            .map_err(|e| CourierError::presence(format!("unregister {user} failed"), e))
    }

    async fn unregister_if_owned(
        &self,
        user: &UserId,
        node: &NodeId,
    ) -> Result<bool, CourierError> {
        let mut conn = self.conn.clone();
        let removed: i64 = self
            .release
            .key(self.key(user))
            .arg(node.as_str())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| CourierError::presence(format!("release {user} failed"), e))?;
        Ok(removed > 0)
    }

    async fn lookup(&self, user: &UserId) -> Result<Option<NodeId>, CourierError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = redis::cmd("GET")
            .arg(self.key(user))
            .query_async(&mut conn)
            .await
            .map_err(|e| CourierError::presence(format!("lookup {user} failed"), e))?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        stored_owner(user, &raw).map(Some).inspect_err(|e| {
            warn!(user_id = %user, error = %e, "stored presence value rejected");
        })
    }
}

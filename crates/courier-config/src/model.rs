// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model for a Courier node.
//!
//! Every struct rejects unknown keys so a typo fails at startup instead of
//! silently falling back to a default.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use courier_core::{NodeId, RefreshPolicy, StartOffset};

const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Top-level Courier configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CourierConfig {
    /// Identity of this node.
    #[serde(default)]
    pub node: NodeConfig,

    /// HTTP/WebSocket listener.
    #[serde(default)]
    pub server: ServerConfig,

    /// Presence directory backend and TTL behavior.
    #[serde(default)]
    pub presence: PresenceConfig,

    /// Partitioned message bus backend.
    #[serde(default)]
    pub bus: BusConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct NodeConfig {
    /// Stable node id. A random one is generated per process when unset,
    /// which forfeits any backlog left on the previous id's partition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: None,
            log_level: default_log_level(),
        }
    }
}

impl NodeConfig {
    /// The configured id, or a fresh `node-<uuid>` when none is set.
    pub fn resolve_id(&self) -> NodeId {
        match &self.id {
            Some(id) => NodeId::from(id.trim()),
            None => NodeId::generate(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Which implementation backs a shared component.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Process-local state. Only useful for a single node or tests.
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PresenceConfig {
    #[serde(default)]
    pub backend: Backend,

    #[serde(default = "default_redis_url")]
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Lifetime of a presence record.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// How often locally connected users are re-registered.
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,

    #[serde(default)]
    pub refresh_policy: RefreshPolicy,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            url: default_redis_url(),
            username: None,
            password: None,
            key_prefix: default_key_prefix(),
            ttl_secs: default_ttl_secs(),
            refresh_interval_secs: default_refresh_interval_secs(),
            refresh_policy: RefreshPolicy::default(),
        }
    }
}

impl PresenceConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }
}

fn default_redis_url() -> String {
    DEFAULT_REDIS_URL.to_string()
}

fn default_key_prefix() -> String {
    "presence:".to_string()
}

fn default_ttl_secs() -> u64 {
    300
}

fn default_refresh_interval_secs() -> u64 {
    120
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BusConfig {
    #[serde(default)]
    pub backend: Backend,

    #[serde(default = "default_redis_url")]
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Stream name prefix; each node consumes `<topic>:<node id>`.
    #[serde(default = "default_topic")]
    pub topic: String,

    /// Consumer group shared by every node.
    #[serde(default = "default_group_id")]
    pub group_id: String,

    #[serde(default)]
    pub start_offset: StartOffset,

    #[serde(default = "default_block_ms")]
    pub block_ms: u64,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,

    /// Approximate per-stream length cap. Zero disables trimming.
    #[serde(default = "default_max_len")]
    pub max_len: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            url: default_redis_url(),
            username: None,
            password: None,
            topic: default_topic(),
            group_id: default_group_id(),
            start_offset: StartOffset::default(),
            block_ms: default_block_ms(),
            batch_size: default_batch_size(),
            publish_timeout_ms: default_publish_timeout_ms(),
            max_len: default_max_len(),
        }
    }
}

impl BusConfig {
    pub fn block(&self) -> Duration {
        Duration::from_millis(self.block_ms)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }
}

fn default_topic() -> String {
    "chat-message".to_string()
}

fn default_group_id() -> String {
    "chat-group".to_string()
}

fn default_block_ms() -> u64 {
    5000
}

fn default_batch_size() -> usize {
    64
}

fn default_publish_timeout_ms() -> u64 {
    5000
}

fn default_max_len() -> usize {
    100_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = CourierConfig::default();
        assert_eq!(config.node.id, None);
        assert_eq!(config.node.log_level, "info");
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.presence.backend, Backend::Memory);
        assert_eq!(config.presence.key_prefix, "presence:");
        assert_eq!(config.presence.ttl(), Duration::from_secs(300));
        assert_eq!(config.presence.refresh_interval(), Duration::from_secs(120));
        assert_eq!(config.presence.refresh_policy, RefreshPolicy::Fixed);
        assert_eq!(config.bus.topic, "chat-message");
        assert_eq!(config.bus.group_id, "chat-group");
        assert_eq!(config.bus.start_offset, StartOffset::Earliest);
        assert_eq!(config.bus.block(), Duration::from_secs(5));
        assert_eq!(config.bus.batch_size, 64);
        assert_eq!(config.bus.max_len, 100_000);
    }

    #[test]
    fn resolve_id_generates_when_unset() {
        let node = NodeConfig::default();
        let a = node.resolve_id();
        let b = node.resolve_id();
        assert!(a.as_str().starts_with("node-"));
        assert_ne!(a, b);

        let fixed = NodeConfig {
            id: Some(" node-a ".into()),
            ..NodeConfig::default()
        };
        assert_eq!(fixed.resolve_id().as_str(), "node-a");
    }

    #[test]
    fn partial_section_keeps_other_defaults() {
        let config: CourierConfig = toml::from_str("[bus]\ntopic = \"t\"\n").unwrap();
        assert_eq!(config.bus.topic, "t");
        assert_eq!(config.bus.group_id, "chat-group");
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn backend_parses_lowercase() {
        let backend: Backend = serde_json::from_str("\"redis\"").unwrap();
        assert_eq!(backend, Backend::Redis);
    }
}

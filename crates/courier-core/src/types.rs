// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Identifiers and wire types shared by every Courier crate.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::CourierError;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Identifies a connected participant; unique across the deployment.
    UserId
);

string_id!(
    /// Identifies one running server process. Doubles as the bus partition key
    /// for messages owed to that process.
    NodeId
);

string_id!(
    /// Tracing identifier stamped on every envelope at send time.
    EventId
);

impl NodeId {
    /// Generate a fresh node identifier for processes started without one.
    pub fn generate() -> Self {
        Self(format!("node-{}", uuid::Uuid::new_v4().simple()))
    }
}

impl EventId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

/// Health status reported by backend health checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// Fully operational.
    Healthy,
    /// Not operational.
    Unhealthy(String),
}

/// When a node refreshes the presence records of the users it holds.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RefreshPolicy {
    /// Register at connect time and on the periodic refresher only.
    #[default]
    Fixed,
    /// Additionally re-register the sender on every send and the receiver on
    /// every delivery.
    Sliding,
}

/// Where a freshly created consumer group starts reading a node's stream.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StartOffset {
    /// Deliver everything still retained in the stream.
    #[default]
    Earliest,
    /// Deliver only messages published after the group is created.
    Latest,
}

/// The presence value stored for one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresenceRecord {
    pub user_id: UserId,
    pub node_id: NodeId,
    pub expires_at: DateTime<Utc>,
}

/// On-the-wire shape accepted when decoding a stored presence value.
#[derive(Deserialize)]
struct StoredPresence {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default, alias = "server_id")]
    node_id: Option<String>,
    #[serde(default)]
    expires_at: Option<DateTime<Utc>>,
}

impl PresenceRecord {
    /// Build a record that expires `ttl` from now.
    pub fn new(user_id: UserId, node_id: NodeId, ttl: Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let expires_at = Utc::now()
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            user_id,
            node_id,
            expires_at,
        }
    }

    pub fn encode(&self) -> Result<String, CourierError> {
        serde_json::to_string(self).map_err(|e| CourierError::Internal(e.to_string()))
    }

    /// Decode and validate a stored value for `user_id`.
    ///
    /// Values written before `expires_at` existed carry no expiry of their own
    /// and rely on the store's TTL.
    pub fn decode(user_id: &UserId, raw: &str) -> Result<Self, CourierError> {
        let malformed = |reason: String| CourierError::MalformedPresence {
            user_id: user_id.clone(),
            reason,
        };

        let stored: StoredPresence =
            serde_json::from_str(raw).map_err(|e| malformed(e.to_string()))?;

        let node_id = match stored.node_id {
            Some(id) if !id.trim().is_empty() => NodeId(id),
            Some(_) => return Err(malformed("empty node_id".to_string())),
            None => return Err(malformed("missing node_id".to_string())),
        };

        if let Some(owner) = stored.user_id {
            if owner != user_id.0 {
                return Err(malformed(format!("record belongs to user {owner}")));
            }
        }

        Ok(Self {
            user_id: user_id.clone(),
            node_id,
            expires_at: stored.expires_at.unwrap_or(DateTime::<Utc>::MAX_UTC),
        })
    }
}

/// A chat request decoded from an inbound connection frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ChatRequestFrame")]
pub struct ChatRequest {
    pub chat_id: String,
    pub receiver_user_id: UserId,
    pub message_type: String,
    pub message: String,
}

/// Inbound frame shape. Older clients name the receiver `receiver_id`;
/// when both names are present `receiver_user_id` wins.
#[derive(Deserialize)]
struct ChatRequestFrame {
    #[serde(default)]
    chat_id: String,
    #[serde(default)]
    receiver_user_id: Option<UserId>,
    #[serde(default)]
    receiver_id: Option<UserId>,
    #[serde(default)]
    message_type: String,
    message: String,
}

impl TryFrom<ChatRequestFrame> for ChatRequest {
    type Error = String;

    fn try_from(frame: ChatRequestFrame) -> Result<Self, Self::Error> {
        let receiver_user_id = frame
            .receiver_user_id
            .or(frame.receiver_id)
            .ok_or_else(|| "missing field `receiver_user_id`".to_string())?;
        Ok(Self {
            chat_id: frame.chat_id,
            receiver_user_id,
            message_type: frame.message_type,
            message: frame.message,
        })
    }
}

/// One chat message in transit through the bus. Immutable once published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    pub event_id: EventId,
    pub chat_id: String,
    pub sender_user_id: UserId,
    pub receiver_user_id: UserId,
    pub message_type: String,
    /// Message body.
    pub message: String,
}

impl MessageEnvelope {
    /// Stamp a request from `sender` with a fresh event id.
    pub fn new(sender: UserId, request: ChatRequest) -> Self {
        Self {
            event_id: EventId::generate(),
            chat_id: request.chat_id,
            sender_user_id: sender,
            receiver_user_id: request.receiver_user_id,
            message_type: request.message_type,
            message: request.message,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, CourierError> {
        serde_json::to_vec(self).map_err(|e| CourierError::Internal(e.to_string()))
    }

    pub fn decode(payload: &[u8]) -> Result<Self, CourierError> {
        serde_json::from_slice(payload).map_err(|source| CourierError::MalformedEnvelope { source })
    }
}

/// The frame written to a receiver's connection for one envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub event_id: EventId,
    pub chat_id: String,
    pub sender: UserId,
    pub message_type: String,
    pub message: String,
}

impl From<&MessageEnvelope> for Notification {
    fn from(envelope: &MessageEnvelope) -> Self {
        Self {
            event_id: envelope.event_id.clone(),
            chat_id: envelope.chat_id.clone(),
            sender: envelope.sender_user_id.clone(),
            message_type: envelope.message_type.clone(),
            message: envelope.message.clone(),
        }
    }
}

/// One delivery handed to a bus subscriber.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Key the payload was published under.
    pub partition_key: NodeId,
    /// Backend-specific position (queue offset, stream entry id).
    pub delivery_id: String,
    /// Encoded [`MessageEnvelope`].
    pub payload: Vec<u8>,
}

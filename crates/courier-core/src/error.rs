// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Courier chat router.

use thiserror::Error;

use crate::types::{EventId, UserId};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The primary error type used across the Courier adapter traits and the
/// routing service.
#[derive(Debug, Error)]
pub enum CourierError {
    /// No presence record exists for the receiver; nothing was published.
    #[error("receiver {receiver} is not connected to any node")]
    ReceiverUnreachable { receiver: UserId },

    /// The message bus rejected the publish.
    #[error("delivery of event {event_id} failed: {source}")]
    DeliveryFailed { event_id: EventId, source: BoxError },

    /// A bus payload could not be decoded into an envelope.
    #[error("malformed envelope: {source}")]
    MalformedEnvelope { source: serde_json::Error },

    /// Writing to a locally held connection failed.
    #[error("write to connection {connection_id} failed: {message}")]
    TransportWriteFailed {
        connection_id: String,
        message: String,
    },

    /// A stored presence value did not pass validation.
    #[error("malformed presence record for {user_id}: {reason}")]
    MalformedPresence { user_id: UserId, reason: String },

    /// Presence backend errors (store unreachable, command failure).
    #[error("presence error: {message}")]
    Presence {
        message: String,
        source: Option<BoxError>,
    },

    /// Message bus backend errors (broker unreachable, timeout, closed bus).
    #[error("bus error: {message}")]
    Bus {
        message: String,
        source: Option<BoxError>,
    },

    /// Transport errors (listener bind, server failure).
    #[error("transport error: {message}")]
    Transport {
        message: String,
        source: Option<BoxError>,
    },

    /// Configuration errors detected after loading.
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CourierError {
    /// Stable snake_case label for the error, used in error frames and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ReceiverUnreachable { .. } => "receiver_unreachable",
            Self::DeliveryFailed { .. } => "delivery_failed",
            Self::MalformedEnvelope { .. } => "malformed_envelope",
            Self::TransportWriteFailed { .. } => "transport_write_failed",
            Self::MalformedPresence { .. } => "malformed_presence",
            Self::Presence { .. } => "presence",
            Self::Bus { .. } => "bus",
            Self::Transport { .. } => "transport",
            Self::Config(_) => "config",
            Self::Internal(_) => "internal",
        }
    }

    /// Shorthand for a presence backend error with a source.
    pub fn presence(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Presence {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Shorthand for a bus backend error with a source.
    pub fn bus(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Bus {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! JSON frames written to WebSocket clients.
//!
//! Server -> Client:
//! ```json
//! {"status": "sent", "event_id": "..."}
//! {"error": "Invalid message format"}
//! {"error": "receiver alice is not connected to any node", "reason": "receiver_unreachable"}
//! {"event_id": "...", "chat_id": "c1", "sender": "bob", "message_type": "text", "message": "hi"}
//! ```

use async_trait::async_trait;
use serde::Serialize;

use courier_core::{
    ConnectionHandle, CourierError, EventId, MessageEnvelope, Notification, NotificationSink,
};

/// Error text for inbound frames that do not decode as a chat request.
pub const INVALID_MESSAGE_FORMAT: &str = "Invalid message format";

/// Acknowledges a request that was routed.
#[derive(Debug, Serialize)]
pub struct SendAck<'a> {
    pub status: &'static str,
    pub event_id: &'a EventId,
}

impl<'a> SendAck<'a> {
    pub fn new(event_id: &'a EventId) -> Self {
        Self {
            status: "sent",
            event_id,
        }
    }
}

/// Inline error reply. The connection stays open after one is sent.
#[derive(Debug, Serialize)]
pub struct ErrorFrame {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
}

impl ErrorFrame {
    pub fn invalid_format() -> Self {
        Self {
            error: INVALID_MESSAGE_FORMAT.to_string(),
            reason: None,
        }
    }

    /// Reply for a request the routing service could not route.
    pub fn routing(err: &CourierError) -> Self {
        Self {
            error: err.to_string(),
            reason: Some(routing_reason(err)),
        }
    }
}

/// The reason label clients can branch on.
pub fn routing_reason(err: &CourierError) -> &'static str {
    match err {
        CourierError::ReceiverUnreachable { .. } => "receiver_unreachable",
        CourierError::DeliveryFailed { .. } => "delivery_failed",
        _ => "internal",
    }
}

pub fn to_text<T: Serialize>(frame: &T) -> Result<String, CourierError> {
    serde_json::to_string(frame).map_err(|e| CourierError::Internal(e.to_string()))
}

/// Notification sink that writes one JSON [`Notification`] text frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonNotifier;

#[async_trait]
impl NotificationSink for JsonNotifier {
    async fn notify(
        &self,
        connection: &dyn ConnectionHandle,
        envelope: &MessageEnvelope,
    ) -> Result<(), CourierError> {
        let frame = to_text(&Notification::from(envelope))?;
        connection.send_text(frame).await
    }
}

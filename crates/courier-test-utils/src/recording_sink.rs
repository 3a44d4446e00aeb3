// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Notification sink that writes JSON notification frames and remembers
//! every envelope it was asked to deliver.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use courier_core::{ConnectionHandle, CourierError, MessageEnvelope, Notification, NotificationSink};

#[derive(Default)]
pub struct RecordingSink {
    delivered: Mutex<Vec<MessageEnvelope>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Envelopes successfully written, in delivery order.
    pub fn delivered(&self) -> Vec<MessageEnvelope> {
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify(
        &self,
        connection: &dyn ConnectionHandle,
        envelope: &MessageEnvelope,
    ) -> Result<(), CourierError> {
        let frame = serde_json::to_string(&Notification::from(envelope))
            .map_err(|e| CourierError::Internal(e.to_string()))?;
        connection.send_text(frame).await?;
        self.delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(envelope.clone());
        Ok(())
    }
}

// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The routing service's view of one accepted WebSocket.

use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::Message;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use courier_core::{ConnectionHandle, CourierError};

/// How long a write may wait for room in the socket's outbound queue.
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to a socket whose frames are written by a dedicated writer task.
pub struct WsConnection {
    id: String,
    outbound: mpsc::Sender<Message>,
    closed: CancellationToken,
}

impl WsConnection {
    pub fn new(id: String, outbound: mpsc::Sender<Message>, closed: CancellationToken) -> Self {
        Self {
            id,
            outbound,
            closed,
        }
    }

    fn write_failed(&self, message: impl Into<String>) -> CourierError {
        CourierError::TransportWriteFailed {
            connection_id: self.id.clone(),
            message: message.into(),
        }
    }
}

#[async_trait]
impl ConnectionHandle for WsConnection {
    fn connection_id(&self) -> &str {
        &self.id
    }

    async fn send_text(&self, text: String) -> Result<(), CourierError> {
        if self.closed.is_cancelled() {
            return Err(self.write_failed("connection closed"));
        }
        self.outbound
            .send_timeout(Message::Text(text.into()), WRITE_TIMEOUT)
            .await
            .map_err(|e| match e {
                mpsc::error::SendTimeoutError::Timeout(_) => {
                    self.write_failed("outbound queue full")
                }
                mpsc::error::SendTimeoutError::Closed(_) => self.write_failed("writer stopped"),
            })
    }

    fn close(&self) {
        self.closed.cancel();
    }
}

// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Local connection handles and the sink that writes notifications to them.

use async_trait::async_trait;

use crate::error::CourierError;
use crate::types::MessageEnvelope;

/// A process-local reference to one live duplex connection.
#[async_trait]
pub trait ConnectionHandle: Send + Sync + 'static {
    /// Unique id of this connection (distinct across reconnects of one user).
    fn connection_id(&self) -> &str;

    /// Queues a text frame for the peer.
    async fn send_text(&self, text: String) -> Result<(), CourierError>;

    /// Closes the connection. Calling it more than once has no further effect.
    fn close(&self);
}

/// Pushes a delivered envelope to a locally held connection.
///
/// Implemented by the transport layer, which owns the outbound frame format.
#[async_trait]
pub trait NotificationSink: Send + Sync + 'static {
    async fn notify(
        &self,
        connection: &dyn ConnectionHandle,
        envelope: &MessageEnvelope,
    ) -> Result<(), CourierError>;
}

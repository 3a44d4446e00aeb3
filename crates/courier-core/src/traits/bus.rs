// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Partitioned message bus trait and the subscription handle it returns.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::CourierError;
use crate::traits::adapter::BackendAdapter;
use crate::types::{Delivery, MessageEnvelope, NodeId};

/// Receives deliveries for one partition key, one at a time.
#[async_trait]
pub trait DeliveryHandler: Send + Sync + 'static {
    async fn handle(&self, delivery: Delivery) -> Result<(), CourierError>;
}

/// Durable publish/subscribe channel keyed by node id.
///
/// Delivery is at-least-once to whichever subscriber is bound to the key, in
/// publish order per key. There is no ordering across keys.
#[async_trait]
pub trait MessageBus: BackendAdapter {
    /// Appends `envelope` under `partition_key`. Failures surface here.
    async fn publish(
        &self,
        partition_key: &NodeId,
        envelope: &MessageEnvelope,
    ) -> Result<(), CourierError>;

    /// Starts a background loop that feeds deliveries for `partition_key` to
    /// `handler`. Handler errors and panics are contained per delivery.
    async fn subscribe(
        &self,
        partition_key: &NodeId,
        handler: Arc<dyn DeliveryHandler>,
    ) -> Result<Subscription, CourierError>;

    /// Stops every subscription loop and releases backend resources.
    async fn close(&self) -> Result<(), CourierError>;
}

/// Handle for a running subscription loop.
///
/// Dropping the handle cancels the loop without waiting for it.
#[derive(Debug)]
pub struct Subscription {
    partition_key: NodeId,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(partition_key: NodeId, cancel: CancellationToken, task: JoinHandle<()>) -> Self {
        Self {
            partition_key,
            cancel,
            task: Some(task),
        }
    }

    pub fn partition_key(&self) -> &NodeId {
        &self.partition_key
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().is_none_or(|t| t.is_finished())
    }

    /// Stops the loop and waits for the in-flight delivery, if any, to finish.
    pub async fn cancel(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(
                    partition_key = %self.partition_key,
                    error = %e,
                    "subscription task ended abnormally"
                );
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

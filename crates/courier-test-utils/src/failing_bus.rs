// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A message bus whose broker is permanently unreachable.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use courier_core::{
    BackendAdapter, CourierError, DeliveryHandler, HealthStatus, MessageBus, MessageEnvelope,
    NodeId, Subscription,
};

/// Fails every publish and subscribe with a `Bus` error, counting attempts.
#[derive(Default)]
pub struct FailingBus {
    attempts: AtomicU64,
}

impl FailingBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish_attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    fn unreachable() -> CourierError {
        CourierError::Bus {
            message: "broker unreachable".to_string(),
            source: None,
        }
    }
}

#[async_trait]
impl BackendAdapter for FailingBus {
    fn name(&self) -> &str {
        "failing"
    }

    async fn health_check(&self) -> Result<HealthStatus, CourierError> {
        Ok(HealthStatus::Unhealthy("broker unreachable".to_string()))
    }
}

#[async_trait]
impl MessageBus for FailingBus {
    async fn publish(
        &self,
        _partition_key: &NodeId,
        _envelope: &MessageEnvelope,
    ) -> Result<(), CourierError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(Self::unreachable())
    }

    async fn subscribe(
        &self,
        _partition_key: &NodeId,
        _handler: Arc<dyn DeliveryHandler>,
    ) -> Result<Subscription, CourierError> {
        Err(Self::unreachable())
    }

    async fn close(&self) -> Result<(), CourierError> {
        Ok(())
    }
}

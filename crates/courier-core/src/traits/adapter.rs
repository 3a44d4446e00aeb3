// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Base trait shared by the pluggable backends (presence store, message bus).

use async_trait::async_trait;

use crate::error::CourierError;
use crate::types::HealthStatus;

/// Identity and health for an externally hosted backend.
#[async_trait]
pub trait BackendAdapter: Send + Sync + 'static {
    /// Short name of the backend implementation ("memory", "redis").
    fn name(&self) -> &str;

    /// Checks the backend and reports its current status.
    async fn health_check(&self) -> Result<HealthStatus, CourierError>;
}

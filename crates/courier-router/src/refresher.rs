// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Periodic re-registration of the users a node holds.

use std::sync::Weak;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

use crate::service::RoutingService;

/// Spawns the refresher on `tasks`. The task holds only a weak reference, so
/// it ends by itself once the service is dropped.
pub(crate) fn spawn_refresher(
    tasks: &TaskTracker,
    service: Weak<RoutingService>,
    period: Duration,
    cancel: CancellationToken,
) {
    tasks.spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let Some(service) = service.upgrade() else {
                break;
            };
            service.refresh_presence().await;
        }
        debug!("presence refresher stopped");
    });
}

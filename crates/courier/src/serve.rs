// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `courier serve` command implementation.
//!
//! Wires the configured presence directory and message bus into a routing
//! service, serves the WebSocket gateway, and on SIGINT/SIGTERM stops
//! accepting clients, closes local sockets, withdraws their presence and
//! closes the bus before exiting.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use courier_bus::{MemoryBus, RedisStreamBus, RedisStreamSettings};
use courier_config::{Backend, BusConfig, CourierConfig, PresenceConfig};
use courier_core::{CourierError, MessageBus, PresenceDirectory};
use courier_gateway::{GatewayState, JsonNotifier, ServerConfig, start_server};
use courier_presence::{MemoryPresence, RedisPresence, RedisPresenceSettings};
use courier_router::{RoutingOptions, RoutingService};

use crate::shutdown;

/// Upper bound on waiting for the HTTP server to finish after shutdown.
const SERVER_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs a node until a shutdown signal arrives or the server fails.
pub async fn run_serve(config: CourierConfig) -> Result<(), CourierError> {
    init_tracing(&config.node.log_level);

    let node_id = config.node.resolve_id();
    info!(
        node_id = %node_id,
        presence = ?config.presence.backend,
        bus = ?config.bus.backend,
        "starting courier node"
    );
    if config.node.id.is_none() {
        warn!(
            node_id = %node_id,
            "node.id not set; using a generated id, backlog of previous runs is not resumed"
        );
    }

    let presence = build_presence(&config.presence).await?;
    let bus = build_bus(&config.bus).await?;

    let routing = Arc::new(RoutingService::new(
        node_id.clone(),
        presence,
        bus,
        Arc::new(JsonNotifier),
        routing_options(&config.presence),
    ));
    routing.start().await?;

    let signal = shutdown::install_signal_handler();
    let stop_accepting = CancellationToken::new();
    let server_config = ServerConfig {
        host: config.server.host.clone(),
        port: config.server.port,
    };
    let state = GatewayState::new(Arc::clone(&routing));
    let mut server = tokio::spawn({
        let token = stop_accepting.clone();
        async move { start_server(&server_config, state, token).await }
    });

    let early_exit = tokio::select! {
        _ = signal.cancelled() => None,
        result = &mut server => Some(result),
    };

    stop_accepting.cancel();
    let routing_result = routing.shutdown().await;

    let server_result = match early_exit {
        Some(result) => flatten(result),
        None => match tokio::time::timeout(SERVER_DRAIN_TIMEOUT, server).await {
            Ok(result) => flatten(result),
            Err(_) => {
                warn!("gateway did not stop in time, abandoning open connections");
                Ok(())
            }
        },
    };

    if let Err(e) = &routing_result {
        error!(error = %e, "routing shutdown incomplete");
    }
    info!(node_id = %node_id, "courier serve shutdown complete");
    server_result.and(routing_result)
}

fn flatten(
    result: Result<Result<(), CourierError>, tokio::task::JoinError>,
) -> Result<(), CourierError> {
    result.map_err(|e| CourierError::Internal(format!("gateway task failed: {e}")))?
}

pub(crate) fn routing_options(presence: &PresenceConfig) -> RoutingOptions {
    RoutingOptions {
        presence_ttl: presence.ttl(),
        refresh_interval: presence.refresh_interval(),
        refresh_policy: presence.refresh_policy,
    }
}

pub(crate) async fn build_presence(
    config: &PresenceConfig,
) -> Result<Arc<dyn PresenceDirectory>, CourierError> {
    match config.backend {
        Backend::Memory => Ok(Arc::new(MemoryPresence::new())),
        Backend::Redis => {
            let settings = RedisPresenceSettings {
                url: config.url.clone(),
                username: config.username.clone(),
                password: config.password.clone(),
                key_prefix: config.key_prefix.clone(),
            };
            Ok(Arc::new(RedisPresence::connect(&settings).await?))
        }
    }
}

pub(crate) async fn build_bus(config: &BusConfig) -> Result<Arc<dyn MessageBus>, CourierError> {
    match config.backend {
        Backend::Memory => Ok(Arc::new(MemoryBus::new())),
        Backend::Redis => {
            let settings = RedisStreamSettings {
                url: config.url.clone(),
                username: config.username.clone(),
                password: config.password.clone(),
                topic: config.topic.clone(),
                group_id: config.group_id.clone(),
                start_offset: config.start_offset,
                block: config.block(),
                batch_size: config.batch_size,
                publish_timeout: config.publish_timeout(),
                max_len: config.max_len,
            };
            Ok(Arc::new(RedisStreamBus::connect(settings).await?))
        }
    }
}

/// `RUST_LOG` wins; otherwise `courier` crates log at `log_level` and
/// dependencies at `warn`.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("courier={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .init();
}

// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gateway HTTP server built on axum.
//!
//! Sets up routes, middleware, and shared state for the gateway.

use std::sync::Arc;

use axum::{Router, routing::get};
use dashmap::DashMap;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use courier_core::{CourierError, UserId};
use courier_router::RoutingService;

use crate::handlers;
use crate::ws;

/// Health state for the liveness endpoints.
#[derive(Clone)]
pub struct HealthState {
    /// Process start time for uptime calculation.
    pub start_time: std::time::Instant,
}

/// Shared state for axum request handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub routing: Arc<RoutingService>,
    /// Map of ws_id -> user for every open socket.
    pub sockets: Arc<DashMap<String, UserId>>,
    pub health: HealthState,
}

impl GatewayState {
    pub fn new(routing: Arc<RoutingService>) -> Self {
        Self {
            routing,
            sockets: Arc::new(DashMap::new()),
            health: HealthState {
                start_time: std::time::Instant::now(),
            },
        }
    }
}

/// Gateway server configuration (mirrors `ServerConfig` from courier-config).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Builds the application router:
/// - GET / and GET /health
/// - GET /ws/user/{user_id}
pub fn router(state: GatewayState) -> Router {
    let public_routes = Router::new()
        .route("/", get(handlers::get_health))
        .route("/health", get(handlers::get_health))
        .with_state(state.clone());

    let ws_routes = Router::new()
        .route("/ws/user/{user_id}", get(ws::ws_handler))
        .route("/ws/user", get(handlers::get_missing_user))
        .route("/ws/user/", get(handlers::get_missing_user))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(ws_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Binds the configured address and serves until `shutdown` is cancelled.
pub async fn start_server(
    config: &ServerConfig,
    state: GatewayState,
    shutdown: CancellationToken,
) -> Result<(), CourierError> {
    let addr = config.addr();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| CourierError::Transport {
            message: format!("failed to bind gateway to {addr}: {e}"),
            source: Some(Box::new(e)),
        })?;
    serve(listener, state, shutdown).await
}

/// Serves on an already bound listener. New connections stop being accepted
/// once `shutdown` is cancelled.
pub async fn serve(
    listener: TcpListener,
    state: GatewayState,
    shutdown: CancellationToken,
) -> Result<(), CourierError> {
    let local = listener
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "<unknown>".to_string());
    tracing::info!(addr = local.as_str(), node_id = %state.routing.node_id(), "gateway listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| CourierError::Transport {
            message: format!("gateway server error: {e}"),
            source: Some(Box::new(e)),
        })?;

    tracing::info!(addr = local.as_str(), "gateway stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_config_addr() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 3000,
        };
        assert_eq!(config.addr(), "127.0.0.1:3000");
        assert!(format!("{config:?}").contains("127.0.0.1"));
    }

    #[tokio::test]
    async fn bind_failure_is_transport_error() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();
        let state = GatewayState::new(Arc::new(RoutingService::new(
            "node-a".into(),
            Arc::new(courier_presence::MemoryPresence::new()),
            Arc::new(courier_bus::MemoryBus::new()),
            Arc::new(crate::frames::JsonNotifier),
            courier_router::RoutingOptions::default(),
        )));

        let err = start_server(
            &ServerConfig {
                host: "127.0.0.1".to_string(),
                port,
            },
            state,
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind(), "transport");
    }
}

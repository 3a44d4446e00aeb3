// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Plain HTTP handlers: liveness and the missing-user rejection.

use axum::{Json, extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};

use crate::server::GatewayState;

/// Response body for GET / and GET /health.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_id: String,
    pub version: String,
    pub uptime_secs: u64,
    /// Open WebSocket connections on this node.
    pub connections: usize,
}

/// Error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// GET / and GET /health
pub async fn get_health(State(state): State<GatewayState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        node_id: state.routing.node_id().to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.health.start_time.elapsed().as_secs(),
        connections: state.sockets.len(),
    })
}

/// GET /ws/user without a user id.
pub async fn get_missing_user() -> (StatusCode, Json<ErrorResponse>) {
    missing_user_id()
}

pub(crate) fn missing_user_id() -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: "user_id is required".to_string(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use courier_bus::MemoryBus;
    use courier_presence::MemoryPresence;
    use courier_router::{RoutingOptions, RoutingService};
    use tower::ServiceExt;

    use crate::frames::JsonNotifier;
    use crate::server::router;

    use super::*;

    fn state() -> GatewayState {
        let routing = Arc::new(RoutingService::new(
            "node-a".into(),
            Arc::new(MemoryPresence::new()),
            Arc::new(MemoryBus::new()),
            Arc::new(JsonNotifier),
            RoutingOptions::default(),
        ));
        GatewayState::new(routing)
    }

    async fn get(uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router(state())
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn health_reports_node_and_connections() {
        for uri in ["/", "/health"] {
            let (status, json) = get(uri).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(json["status"], "ok");
            assert_eq!(json["node_id"], "node-a");
            assert_eq!(json["connections"], 0);
            assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
        }
    }

    #[tokio::test]
    async fn missing_user_id_is_bad_request() {
        for uri in ["/ws/user", "/ws/user/"] {
            let (status, json) = get(uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(json, serde_json::json!({"error": "user_id is required"}));
        }
    }

    #[test]
    fn health_response_serializes() {
        let resp = HealthResponse {
            status: "ok".to_string(),
            node_id: "node-a".to_string(),
            version: "0.1.0".to_string(),
            uptime_secs: 42,
            connections: 3,
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"uptime_secs\":42"));
        assert!(json.contains("\"connections\":3"));
    }
}

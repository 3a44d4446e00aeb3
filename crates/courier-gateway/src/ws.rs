// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! WebSocket handler binding one socket to one user.
//!
//! Client -> Server (JSON):
//! ```json
//! {"chat_id": "c1", "receiver_user_id": "alice", "message_type": "text", "message": "hi"}
//! ```
//!
//! Server -> Client frames are described in [`crate::frames`].

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use courier_core::{ChatRequest, CourierError, UserId};

use crate::connection::WsConnection;
use crate::frames::{self, ErrorFrame, SendAck};
use crate::handlers::missing_user_id;
use crate::server::GatewayState;

/// Outbound frames buffered per socket before writes start to wait.
const OUTBOUND_BUFFER: usize = 64;

/// How long the writer gets to flush a close frame.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// GET /ws/user/{user_id}
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(user_id): Path<String>,
    State(state): State<GatewayState>,
) -> Response {
    if user_id.trim().is_empty() {
        return missing_user_id().into_response();
    }
    let user = UserId::from(user_id);
    ws.on_upgrade(move |socket| handle_socket(socket, user, state))
}

/// Handle an individual WebSocket connection.
///
/// A writer task owns the sink half and drains the outbound queue; this task
/// reads frames, routes them, and unbinds the user when the socket ends.
async fn handle_socket(socket: WebSocket, user: UserId, state: GatewayState) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let ws_id = uuid::Uuid::new_v4().to_string();

    let (tx, mut rx) = mpsc::channel::<Message>(OUTBOUND_BUFFER);
    let closed = CancellationToken::new();
    let connection = Arc::new(WsConnection::new(ws_id.clone(), tx.clone(), closed.clone()));
    state.sockets.insert(ws_id.clone(), user.clone());

    let writer_closed = closed.clone();
    let mut writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                next = rx.recv() => match next {
                    Some(msg) => {
                        if ws_sender.send(msg).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                _ = writer_closed.cancelled() => {
                    let _ = ws_sender.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    if let Err(e) = state.routing.connect(user.clone(), connection).await {
        // The socket stays usable for sending; others cannot reach it until
        // the next presence refresh succeeds.
        error!(user_id = %user, error = %e, "presence registration failed");
    }

    loop {
        let next = tokio::select! {
            biased;
            _ = closed.cancelled() => break,
            next = ws_receiver.next() => next,
        };
        match next {
            Some(Ok(Message::Text(text))) => {
                handle_frame(&state, &user, text.as_str().as_bytes(), &tx).await;
            }
            Some(Ok(Message::Binary(bytes))) => {
                handle_frame(&state, &user, &bytes, &tx).await;
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {} // ping/pong are answered by the protocol layer
            Some(Err(e)) => {
                debug!(
                    user_id = %user,
                    connection_id = ws_id.as_str(),
                    error = %e,
                    "socket read failed"
                );
                break;
            }
        }
    }

    match state.routing.disconnect(&user, &ws_id).await {
        Ok(_) => {}
        Err(e) => warn!(user_id = %user, error = %e, "presence cleanup failed"),
    }
    state.sockets.remove(&ws_id);

    closed.cancel();
    if tokio::time::timeout(CLOSE_GRACE, &mut writer).await.is_err() {
        writer.abort();
    }
    info!(user_id = %user, connection_id = ws_id.as_str(), "socket closed");
}

/// Decodes one inbound frame, routes it and queues the reply.
async fn handle_frame(
    state: &GatewayState,
    user: &UserId,
    payload: &[u8],
    replies: &mpsc::Sender<Message>,
) {
    let reply = match serde_json::from_slice::<ChatRequest>(payload) {
        Err(e) => {
            debug!(user_id = %user, error = %e, "invalid inbound frame");
            frames::to_text(&ErrorFrame::invalid_format())
        }
        Ok(request) => match state.routing.send(user, request).await {
            Ok(event_id) => frames::to_text(&SendAck::new(&event_id)),
            Err(e) => {
                log_routing_failure(user, &e);
                frames::to_text(&ErrorFrame::routing(&e))
            }
        },
    };

    match reply {
        Ok(text) => {
            if replies.send(Message::Text(text.into())).await.is_err() {
                debug!(user_id = %user, "socket writer gone, reply dropped");
            }
        }
        Err(e) => error!(user_id = %user, error = %e, "failed to encode reply frame"),
    }
}

fn log_routing_failure(user: &UserId, err: &CourierError) {
    match err {
        CourierError::ReceiverUnreachable { receiver } => {
            debug!(sender = %user, receiver = %receiver, "receiver unreachable");
        }
        CourierError::DeliveryFailed { event_id, .. } => {
            error!(sender = %user, %event_id, error = %err, "publish failed");
        }
        _ => error!(sender = %user, kind = err.kind(), error = %err, "routing failed"),
    }
}

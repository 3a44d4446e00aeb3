// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP/WebSocket transport for the Courier chat router.
//!
//! Each accepted socket is bound to the user named in its path, registered
//! with the [`courier_router::RoutingService`], and fed every chat request the
//! client writes. Notifications flow back through [`JsonNotifier`], the
//! gateway's notification sink.

pub mod connection;
pub mod frames;
pub mod handlers;
pub mod server;
pub mod ws;

pub use connection::WsConnection;
pub use frames::JsonNotifier;
pub use server::{GatewayState, ServerConfig, router, serve, start_server};

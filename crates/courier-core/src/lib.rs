// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Courier chat router.
//!
//! This crate provides the trait definitions, error type, and wire types used
//! throughout the Courier workspace. Presence stores, message buses and
//! transports implement the traits defined here; the routing service only
//! ever talks to them through these seams.

pub mod error;
pub mod traits;
pub mod types;

pub use error::CourierError;
pub use types::{
    ChatRequest, Delivery, EventId, HealthStatus, MessageEnvelope, NodeId, Notification,
    PresenceRecord, RefreshPolicy, StartOffset, UserId,
};

pub use traits::{
    BackendAdapter, ConnectionHandle, DeliveryHandler, MessageBus, NotificationSink,
    PresenceDirectory, Subscription,
};

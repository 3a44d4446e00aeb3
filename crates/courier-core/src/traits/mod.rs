// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Trait seams between the routing core and its collaborators.
//!
//! Backends use `#[async_trait]` so they can be held as trait objects.

pub mod adapter;
pub mod bus;
pub mod connection;
pub mod presence;

pub use adapter::BackendAdapter;
pub use bus::{DeliveryHandler, MessageBus, Subscription};
pub use connection::{ConnectionHandle, NotificationSink};
pub use presence::PresenceDirectory;

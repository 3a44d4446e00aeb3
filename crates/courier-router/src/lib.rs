// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Connection registry and routing service for the Courier chat router.
//!
//! [`RoutingService`] owns the node's [`ConnectionRegistry`] and talks to the
//! presence directory, the message bus and the notification sink only through
//! the traits in `courier-core`. Transports hold the service and call into it;
//! the service calls back out only through the sink.

pub mod observers;
mod refresher;
pub mod registry;
pub mod service;

pub use observers::{EnvelopeObserver, ObserverRegistry, ObserverToken};
pub use registry::ConnectionRegistry;
pub use service::{RoutingOptions, RoutingService};

// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Courier integration tests.
//!
//! Provides mock adapters and a cluster harness for fast, deterministic,
//! CI-runnable tests without Redis.
//!
//! # Components
//!
//! - [`MockConnection`] - Connection handle that captures written frames
//! - [`RecordingSink`] - Notification sink that records delivered envelopes
//! - [`FailingBus`] - Message bus with an unreachable broker
//! - [`TestCluster`] - Several routing services over shared in-memory backends

pub mod failing_bus;
pub mod harness;
pub mod mock_connection;
pub mod recording_sink;

pub use failing_bus::FailingBus;
pub use harness::{TestCluster, TestClusterBuilder, TestNode, eventually};
pub use mock_connection::MockConnection;
pub use recording_sink::RecordingSink;

// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Presence directory backends.
//!
//! - [`MemoryPresence`]: process-local map, for single-node runs and tests.
//! - [`RedisPresence`]: shared Redis keys with native expiry, for clusters.

pub mod memory;
pub mod redis_store;

pub use memory::MemoryPresence;
pub use redis_store::{RedisPresence, RedisPresenceSettings};

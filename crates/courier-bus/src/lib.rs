// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Partitioned message bus backends for Courier.
//!
//! Both backends implement [`courier_core::MessageBus`]: messages published
//! under a partition key reach only the subscriber bound to that key, in
//! publish order, and a failing handler never stops its subscription loop.

pub mod dispatch;
pub mod memory;
pub mod redis_stream;

pub use dispatch::{DispatchOutcome, dispatch};
pub use memory::MemoryBus;
pub use redis_stream::{RedisStreamBus, RedisStreamSettings};

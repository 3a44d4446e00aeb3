// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Presence directory trait: which node holds a user's live connection.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::CourierError;
use crate::traits::adapter::BackendAdapter;
use crate::types::{NodeId, UserId};

/// Shared, TTL-backed map from user to owning node.
///
/// Writers overwrite (last writer wins); there is no cross-node coordination.
/// Lookups answer from whatever the backing store currently holds.
#[async_trait]
pub trait PresenceDirectory: BackendAdapter {
    /// Upserts the record for `user` and resets its TTL clock.
    async fn register(&self, user: &UserId, node: &NodeId, ttl: Duration)
        -> Result<(), CourierError>;

    /// Deletes the record for `user`. Absent records are not an error.
    async fn unregister(&self, user: &UserId) -> Result<(), CourierError>;

    /// Deletes the record for `user` only while it names `node`, as one
    /// atomic step against the store. Records the store cannot decode are
    /// deleted too. Returns whether a record was removed.
    async fn unregister_if_owned(&self, user: &UserId, node: &NodeId)
        -> Result<bool, CourierError>;

    /// Returns the owning node, or `None` when no live record exists.
    async fn lookup(&self, user: &UserId) -> Result<Option<NodeId>, CourierError>;
}

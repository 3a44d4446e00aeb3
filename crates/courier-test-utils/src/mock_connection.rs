// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Mock connection handle for deterministic testing.
//!
//! `MockConnection` implements `ConnectionHandle` and captures every frame
//! written to it. Writes can be made to fail to exercise eviction paths.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use courier_core::{ConnectionHandle, CourierError, Notification};

/// A captured, in-memory stand-in for a live duplex connection.
pub struct MockConnection {
    id: String,
    frames: Mutex<Vec<String>>,
    closes: AtomicUsize,
    fail_writes: AtomicBool,
}

impl MockConnection {
    pub fn new(id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            frames: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
            fail_writes: AtomicBool::new(false),
        })
    }

    /// Every text frame written so far, in order.
    pub fn frames(&self) -> Vec<String> {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Frames that decode as notifications.
    pub fn notifications(&self) -> Vec<Notification> {
        self.frames()
            .iter()
            .filter_map(|f| serde_json::from_str(f).ok())
            .collect()
    }

    /// How many times `close()` was called.
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.close_count() > 0
    }

    /// Makes subsequent writes fail with `TransportWriteFailed`.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConnectionHandle for MockConnection {
    fn connection_id(&self) -> &str {
        &self.id
    }

    async fn send_text(&self, text: String) -> Result<(), CourierError> {
        if self.fail_writes.load(Ordering::SeqCst) || self.is_closed() {
            return Err(CourierError::TransportWriteFailed {
                connection_id: self.id.clone(),
                message: "mock connection rejected write".to_string(),
            });
        }
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(text);
        Ok(())
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_frames_in_order() {
        let conn = MockConnection::new("c1");
        conn.send_text("one".into()).await.unwrap();
        conn.send_text("two".into()).await.unwrap();
        assert_eq!(conn.frames(), vec!["one", "two"]);
        assert_eq!(conn.connection_id(), "c1");
    }

    #[tokio::test]
    async fn failing_and_closed_connections_reject_writes() {
        let conn = MockConnection::new("c1");
        conn.fail_writes(true);
        assert!(conn.send_text("x".into()).await.is_err());

        conn.fail_writes(false);
        conn.close();
        assert!(conn.send_text("x".into()).await.is_err());
        assert_eq!(conn.close_count(), 1);
        assert!(conn.frames().is_empty());
    }
}

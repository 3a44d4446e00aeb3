// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Local observers of every envelope delivered to this node.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::Mutex;
use tracing::error;

use courier_core::MessageEnvelope;

/// Receives every envelope this node consumes, before connection lookup.
#[async_trait]
pub trait EnvelopeObserver: Send + Sync + 'static {
    async fn observe(&self, envelope: &MessageEnvelope);
}

/// Returned by [`ObserverRegistry::subscribe`]; pass it back to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverToken(u64);

#[derive(Default)]
struct Observers {
    next_token: u64,
    entries: Vec<(ObserverToken, Arc<dyn EnvelopeObserver>)>,
}

/// Ordered observer list. Mutation and fan-out share one lock, so an
/// observer removed by `unsubscribe` is never invoked afterwards.
#[derive(Default)]
pub struct ObserverRegistry {
    inner: Mutex<Observers>,
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(&self, observer: Arc<dyn EnvelopeObserver>) -> ObserverToken {
        let mut inner = self.inner.lock().await;
        let token = ObserverToken(inner.next_token);
        inner.next_token += 1;
        inner.entries.push((token, observer));
        token
    }

    /// Returns `false` when the token was not registered.
    pub async fn unsubscribe(&self, token: ObserverToken) -> bool {
        let mut inner = self.inner.lock().await;
        let before = inner.entries.len();
        inner.entries.retain(|(t, _)| *t != token);
        inner.entries.len() != before
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.entries.len()
    }

    /// Calls every observer in registration order. A panicking observer is
    /// logged and skipped.
    pub async fn notify(&self, envelope: &MessageEnvelope) {
        let inner = self.inner.lock().await;
        for (token, observer) in &inner.entries {
            if AssertUnwindSafe(observer.observe(envelope))
                .catch_unwind()
                .await
                .is_err()
            {
                error!(
                    observer = token.0,
                    event_id = %envelope.event_id,
                    "envelope observer panicked"
                );
            }
        }
    }
}

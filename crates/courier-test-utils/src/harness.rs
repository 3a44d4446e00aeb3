// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Multi-node cluster harness for end-to-end routing tests.
//!
//! `TestCluster` runs any number of routing services in one process, all
//! sharing a single in-memory presence directory and message bus, exactly as
//! separate processes would share Redis.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use courier_bus::MemoryBus;
use courier_core::{CourierError, NodeId, UserId};
use courier_presence::MemoryPresence;
use courier_router::{RoutingOptions, RoutingService};

use crate::mock_connection::MockConnection;
use crate::recording_sink::RecordingSink;

/// Builder for [`TestCluster`].
pub struct TestClusterBuilder {
    nodes: Vec<String>,
    options: RoutingOptions,
}

impl TestClusterBuilder {
    fn new() -> Self {
        Self {
            nodes: Vec::new(),
            options: RoutingOptions::default(),
        }
    }

    /// Adds a node that will be started by `build()`.
    pub fn with_node(mut self, node_id: impl Into<String>) -> Self {
        self.nodes.push(node_id.into());
        self
    }

    pub fn with_options(mut self, options: RoutingOptions) -> Self {
        self.options = options;
        self
    }

    /// Starts every configured node.
    pub async fn build(self) -> Result<TestCluster, CourierError> {
        let mut cluster = TestCluster {
            presence: Arc::new(MemoryPresence::new()),
            bus: Arc::new(MemoryBus::new()),
            options: self.options,
            nodes: HashMap::new(),
            next_connection: AtomicU64::new(0),
        };
        for node in self.nodes {
            cluster.add_node(node).await?;
        }
        Ok(cluster)
    }
}

/// One node of a [`TestCluster`].
#[derive(Clone)]
pub struct TestNode {
    pub service: Arc<RoutingService>,
    pub sink: Arc<RecordingSink>,
}

/// Several routing services over shared in-memory backends.
pub struct TestCluster {
    pub presence: Arc<MemoryPresence>,
    pub bus: Arc<MemoryBus>,
    options: RoutingOptions,
    nodes: HashMap<NodeId, TestNode>,
    next_connection: AtomicU64,
}

impl TestCluster {
    pub fn builder() -> TestClusterBuilder {
        TestClusterBuilder::new()
    }

    /// Creates and starts another node.
    pub async fn add_node(&mut self, node_id: impl Into<String>) -> Result<TestNode, CourierError> {
        let node_id = NodeId::from(node_id.into());
        let sink = Arc::new(RecordingSink::new());
        let service = Arc::new(RoutingService::new(
            node_id.clone(),
            self.presence.clone(),
            self.bus.clone(),
            sink.clone(),
            self.options.clone(),
        ));
        service.start().await?;

        let node = TestNode { service, sink };
        self.nodes.insert(node_id, node.clone());
        Ok(node)
    }

    /// Returns the node, panicking if it was never added.
    pub fn node(&self, node_id: &str) -> &TestNode {
        self.nodes
            .get(&NodeId::from(node_id))
            .unwrap_or_else(|| panic!("node {node_id} is not part of the cluster"))
    }

    pub fn service(&self, node_id: &str) -> Arc<RoutingService> {
        Arc::clone(&self.node(node_id).service)
    }

    /// Connects `user` to `node_id` through a fresh mock connection.
    pub async fn connect(
        &self,
        node_id: &str,
        user: &str,
    ) -> Result<Arc<MockConnection>, CourierError> {
        let seq = self.next_connection.fetch_add(1, Ordering::Relaxed);
        let connection = MockConnection::new(format!("{node_id}/{user}/{seq}"));
        self.node(node_id)
            .service
            .connect(UserId::from(user), connection.clone())
            .await?;
        Ok(connection)
    }

    /// Stops every node. The shared bus is closed by the first shutdown.
    pub async fn shutdown(self) -> Result<(), CourierError> {
        for node in self.nodes.values() {
            node.service.shutdown().await?;
        }
        Ok(())
    }
}

/// Polls `check` until it holds or `timeout` elapses.
pub async fn eventually<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

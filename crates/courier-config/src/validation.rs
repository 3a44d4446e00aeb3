// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Semantic checks that serde attributes cannot express.

use crate::diagnostic::ConfigError;
use crate::model::{Backend, CourierConfig};

/// Validate a deserialized configuration.
///
/// Collects every failure instead of stopping at the first one.
pub fn validate_config(config: &CourierConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();
    let mut fail = |message: String| errors.push(ConfigError::Validation { message });

    if let Some(id) = &config.node.id {
        if id.trim().is_empty() {
            fail("node.id must not be empty when set".to_string());
        }
    }

    if config.server.host.trim().is_empty() {
        fail("server.host must not be empty".to_string());
    }

    let presence = &config.presence;
    if presence.ttl_secs == 0 {
        fail("presence.ttl_secs must be greater than zero".to_string());
    }
    if presence.refresh_interval_secs == 0 {
        fail("presence.refresh_interval_secs must be greater than zero".to_string());
    } else if presence.refresh_interval_secs >= presence.ttl_secs {
        // A refresh that lands after expiry leaves a window where the user
        // looks offline.
        fail(format!(
            "presence.refresh_interval_secs ({}) must be less than presence.ttl_secs ({})",
            presence.refresh_interval_secs, presence.ttl_secs
        ));
    }
    if presence.key_prefix.is_empty() {
        fail("presence.key_prefix must not be empty".to_string());
    }
    if presence.backend == Backend::Redis && presence.url.trim().is_empty() {
        fail("presence.url is required when presence.backend = \"redis\"".to_string());
    }

    let bus = &config.bus;
    if bus.topic.trim().is_empty() {
        fail("bus.topic must not be empty".to_string());
    }
    if bus.group_id.trim().is_empty() {
        fail("bus.group_id must not be empty".to_string());
    }
    if bus.batch_size == 0 {
        fail("bus.batch_size must be greater than zero".to_string());
    }
    if bus.block_ms == 0 {
        fail("bus.block_ms must be greater than zero".to_string());
    }
    if bus.publish_timeout_ms == 0 {
        fail("bus.publish_timeout_ms must be greater than zero".to_string());
    }
    if bus.backend == Backend::Redis && bus.url.trim().is_empty() {
        fail("bus.url is required when bus.backend = \"redis\"".to_string());
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

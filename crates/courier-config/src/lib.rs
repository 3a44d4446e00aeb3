// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for a Courier node.
//!
//! Strict TOML parsing (`deny_unknown_fields`), a layered file hierarchy with
//! `COURIER_*` environment overrides, and miette diagnostics with typo
//! suggestions.
//!
//! ```no_run
//! use courier_config::load_and_validate;
//!
//! let config = load_and_validate(None).expect("config errors");
//! println!("listening on port {}", config.server.port);
//! ```

pub mod diagnostic;
pub mod loader;
pub mod model;
pub mod validation;

use std::path::Path;

pub use diagnostic::{ConfigError, render_errors};
pub use loader::{load_config, load_config_from_str};
pub use model::{Backend, BusConfig, CourierConfig, NodeConfig, PresenceConfig, ServerConfig};

/// Load from the file hierarchy and environment, then validate.
///
/// An explicit path that does not exist is an error; the standard locations
/// are optional.
pub fn load_and_validate(explicit: Option<&Path>) -> Result<CourierConfig, Vec<ConfigError>> {
    if let Some(path) = explicit {
        if !path.is_file() {
            return Err(vec![ConfigError::FileNotFound {
                path: path.display().to_string(),
            }]);
        }
    }

    match loader::load_config(explicit) {
        Ok(config) => {
            validation::validate_config(&config)?;
            Ok(config)
        }
        Err(err) => {
            let sources = collect_toml_sources(explicit);
            Err(diagnostic::figment_to_config_errors(err, &sources))
        }
    }
}

/// Load an in-memory TOML document over the defaults, then validate.
pub fn load_and_validate_str(toml_content: &str) -> Result<CourierConfig, Vec<ConfigError>> {
    match loader::load_config_from_str(toml_content) {
        Ok(config) => {
            validation::validate_config(&config)?;
            Ok(config)
        }
        Err(err) => {
            let sources = vec![("<inline>".to_string(), toml_content.to_string())];
            Err(diagnostic::figment_to_config_errors(err, &sources))
        }
    }
}

/// Read every existing config file so diagnostics can point into it.
fn collect_toml_sources(explicit: Option<&Path>) -> Vec<(String, String)> {
    loader::config_paths(explicit)
        .into_iter()
        .filter_map(|path| {
            let content = std::fs::read_to_string(&path).ok()?;
            // Figment records relative files by their absolute path.
            let display = std::path::absolute(&path)
                .unwrap_or(path)
                .display()
                .to_string();
            Some((display, content))
        })
        .collect()
}

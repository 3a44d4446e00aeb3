// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Layered configuration loading with Figment.
//!
//! Merge order, later wins:
//! 1. Compiled defaults
//! 2. `/etc/courier/courier.toml`
//! 3. `$XDG_CONFIG_HOME/courier/courier.toml`
//! 4. `./courier.toml`
//! 5. An explicit `--config` file, when given
//! 6. `COURIER_*` environment variables

// figment::Error is external and cannot be boxed without a wrapper.
#![allow(clippy::result_large_err)]

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::CourierConfig;

const SYSTEM_CONFIG: &str = "/etc/courier/courier.toml";
const LOCAL_CONFIG: &str = "courier.toml";
const ENV_PREFIX: &str = "COURIER_";

/// Top-level sections reachable from the environment.
const SECTIONS: &[&str] = &["node", "server", "presence", "bus"];

/// TOML files consulted for a load, lowest precedence first. Missing files
/// are skipped by Figment.
pub fn config_paths(explicit: Option<&Path>) -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(SYSTEM_CONFIG)];
    if let Some(dir) = dirs::config_dir() {
        paths.push(dir.join("courier").join(LOCAL_CONFIG));
    }
    paths.push(PathBuf::from(LOCAL_CONFIG));
    if let Some(path) = explicit {
        paths.push(path.to_path_buf());
    }
    paths
}

/// Build the Figment used for loading, before extraction.
pub fn build_figment(explicit: Option<&Path>) -> Figment {
    config_paths(explicit)
        .into_iter()
        .fold(
            Figment::new().merge(Serialized::defaults(CourierConfig::default())),
            |figment, path| figment.merge(Toml::file(path)),
        )
        .merge(env_provider())
}

/// Load from the standard file hierarchy, an optional explicit file, and
/// the environment.
pub fn load_config(explicit: Option<&Path>) -> Result<CourierConfig, figment::Error> {
    build_figment(explicit).extract()
}

/// Load from an in-memory TOML document over the compiled defaults only.
pub fn load_config_from_str(toml_content: &str) -> Result<CourierConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(CourierConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// `COURIER_<SECTION>_<KEY>` becomes `<section>.<key>`.
///
/// Only the first underscore after the section name is a separator, so
/// `COURIER_PRESENCE_TTL_SECS` maps to `presence.ttl_secs`. Variables that
/// name no known section (such as `COURIER_TEST_REDIS_URL`) are ignored.
fn env_provider() -> Env {
    Env::prefixed(ENV_PREFIX).filter_map(|key| {
        let key = key.as_str().to_ascii_lowercase();
        SECTIONS.iter().find_map(|section| {
            key.strip_prefix(section)
                .and_then(|rest| rest.strip_prefix('_'))
                .filter(|rest| !rest.is_empty())
                .map(|rest| format!("{section}.{rest}").into())
        })
    })
}

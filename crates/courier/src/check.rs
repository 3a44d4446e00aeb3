// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `courier check` command implementation.
//!
//! Reports whether the loaded configuration is usable for a cluster node
//! and whether the configured presence store and message bus answer.

use std::future::Future;
use std::io::IsTerminal;
use std::time::{Duration, Instant};

use courier_config::{Backend, CourierConfig};
use courier_core::{BackendAdapter, CourierError, HealthStatus};

use crate::serve::{build_bus, build_presence};

/// How long a single backend check may take.
const CHECK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: &'static str,
    pub status: CheckStatus,
    pub message: String,
    pub duration: Duration,
}

/// Runs every check, prints a report, and fails when any check failed.
pub async fn run_check(config: &CourierConfig, plain: bool) -> Result<(), CourierError> {
    let use_color = !plain && std::io::stdout().is_terminal();

    let mut results = vec![check_node(config), check_cluster_backends(config)];
    results.push(
        check_backend("Presence store", async {
            let presence = build_presence(&config.presence).await?;
            presence.health_check().await
        })
        .await,
    );
    results.push(
        check_backend("Message bus", async {
            let bus = build_bus(&config.bus).await?;
            let status = bus.health_check().await;
            bus.close().await?;
            status
        })
        .await,
    );

    println!();
    println!("  courier check");
    println!("  {}", "-".repeat(50));
    for result in &results {
        println!("{}", format_line(result, use_color));
    }
    println!();

    let failures = results
        .iter()
        .filter(|r| r.status == CheckStatus::Fail)
        .count();
    let warnings = results
        .iter()
        .filter(|r| r.status == CheckStatus::Warn)
        .count();
    match (failures, warnings) {
        (0, 0) => println!("  All checks passed."),
        (0, w) => println!("  Passed with {w} warning(s)."),
        (f, _) => println!("  {f} check(s) failed."),
    }
    println!();

    if failures > 0 {
        return Err(CourierError::Config(format!("{failures} check(s) failed")));
    }
    Ok(())
}

fn check_node(config: &CourierConfig) -> CheckResult {
    let start = Instant::now();
    let listen = format!("{}:{}", config.server.host, config.server.port);
    let (status, message) = match &config.node.id {
        Some(id) => (CheckStatus::Pass, format!("{} on {listen}", id.trim())),
        None => (
            CheckStatus::Warn,
            format!("node.id unset, a random id is generated per run (listening on {listen})"),
        ),
    };
    CheckResult {
        name: "Node",
        status,
        message,
        duration: start.elapsed(),
    }
}

/// Memory backends only see the local process, so two nodes cannot route
/// to each other with them.
fn check_cluster_backends(config: &CourierConfig) -> CheckResult {
    let start = Instant::now();
    let local: Vec<&str> = [
        ("presence", config.presence.backend),
        ("bus", config.bus.backend),
    ]
    .into_iter()
    .filter(|(_, backend)| *backend == Backend::Memory)
    .map(|(name, _)| name)
    .collect();

    let (status, message) = if local.is_empty() {
        (CheckStatus::Pass, "shared backends configured".to_string())
    } else {
        (
            CheckStatus::Warn,
            format!("{} use the memory backend (single node only)", local.join(" and ")),
        )
    };
    CheckResult {
        name: "Clustering",
        status,
        message,
        duration: start.elapsed(),
    }
}

async fn check_backend<F>(name: &'static str, check: F) -> CheckResult
where
    F: Future<Output = Result<HealthStatus, CourierError>>,
{
    let start = Instant::now();
    let (status, message) = match tokio::time::timeout(CHECK_TIMEOUT, check).await {
        Ok(Ok(HealthStatus::Healthy)) => (CheckStatus::Pass, "healthy".to_string()),
        Ok(Ok(HealthStatus::Unhealthy(reason))) => (CheckStatus::Fail, reason),
        Ok(Err(e)) => (CheckStatus::Fail, e.to_string()),
        Err(_) => (
            CheckStatus::Fail,
            format!("timeout ({}s)", CHECK_TIMEOUT.as_secs()),
        ),
    };
    CheckResult {
        name,
        status,
        message,
        duration: start.elapsed(),
    }
}

fn format_line(result: &CheckResult, use_color: bool) -> String {
    let duration_ms = result.duration.as_millis();
    if !use_color {
        let tag = match result.status {
            CheckStatus::Pass => "[OK]  ",
            CheckStatus::Warn => "[WARN]",
            CheckStatus::Fail => "[FAIL]",
        };
        return format!(
            "    {tag} {:<16} {} ({duration_ms}ms)",
            result.name, result.message
        );
    }

    use colored::Colorize;
    let (symbol, message) = match result.status {
        CheckStatus::Pass => ("✓".green(), result.message.normal()),
        CheckStatus::Warn => ("!".yellow(), result.message.yellow()),
        CheckStatus::Fail => ("✗".red(), result.message.red()),
    };
    format!(
        "    {symbol} {:<16} {message} ({duration_ms}ms)",
        result.name
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_warns_about_clustering() {
        let result = check_cluster_backends(&CourierConfig::default());
        assert_eq!(result.status, CheckStatus::Warn);
        assert!(result.message.contains("presence and bus"));
    }

    #[test]
    fn configured_node_id_passes() {
        let mut config = CourierConfig::default();
        assert_eq!(check_node(&config).status, CheckStatus::Warn);
        config.node.id = Some("node-a".into());
        let result = check_node(&config);
        assert_eq!(result.status, CheckStatus::Pass);
        assert!(result.message.starts_with("node-a on 0.0.0.0:8080"));
    }

    #[tokio::test]
    async fn memory_backends_report_healthy() {
        let config = CourierConfig::default();
        assert!(run_check(&config, true).await.is_ok());
    }

    #[tokio::test]
    async fn backend_errors_are_failures() {
        let result = check_backend("Bus", async {
            Err(CourierError::Bus {
                message: "broker unreachable".into(),
                source: None,
            })
        })
        .await;
        assert_eq!(result.status, CheckStatus::Fail);
        assert!(result.message.contains("broker unreachable"));
    }

    #[test]
    fn plain_lines_are_tagged() {
        let line = format_line(
            &CheckResult {
                name: "Node",
                status: CheckStatus::Fail,
                message: "boom".into(),
                duration: Duration::from_millis(3),
            },
            false,
        );
        assert_eq!(line.trim_start(), "[FAIL] Node             boom (3ms)");
    }
}

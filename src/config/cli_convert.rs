//! CLI to Config conversion utilities

use crate::config::cli::Cli;
use crate::config::{HarnessConfig, NodeTestContext};
use anyhow::{Context, Result};
use std::time::Duration;

/// Parse a duration string (e.g., "500ms", "90s", "2m", "1h") to a Duration
///
/// A bare number is taken as seconds.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim().to_lowercase();

    let (num_str, millis_per_unit) = if let Some(n) = s.strip_suffix("ms") {
        (n, 1u64)
    } else if let Some(n) = s.strip_suffix("min") {
        (n, 60_000)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1000)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60_000)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 3_600_000)
    } else {
        (s.as_str(), 1000)
    };

    let num: u64 = num_str
        .trim()
        .parse()
        .with_context(|| format!("Invalid duration format: {}", s))?;

    let millis = num
        .checked_mul(millis_per_unit)
        .with_context(|| format!("Duration out of range: {}", s))?;

    Ok(Duration::from_millis(millis))
}

/// Apply CLI overrides to the file configuration (CLI takes precedence)
pub fn apply_cli_overrides(cli: &Cli, config: &mut HarnessConfig) -> Result<()> {
    if let Some(ref timeout) = cli.node_ready_timeout {
        let timeout = parse_duration(timeout).context("Invalid node ready timeout")?;
        // The timeout is configured in whole seconds
        if timeout < Duration::from_secs(1) {
            anyhow::bail!("node ready timeout must be at least 1s, got {:?}", timeout);
        }
        config.readiness.timeout_secs = (timeout.as_millis() as u64).div_ceil(1000);
    }

    if let Some(ref interval) = cli.node_ready_poll_interval {
        let interval = parse_duration(interval).context("Invalid node ready poll interval")?;
        config.readiness.poll_interval_ms = interval.as_millis() as u64;
    }

    Ok(())
}

/// Initial node test context from CLI flags
///
/// The node name stays empty when not given; setup resolves it from the
/// hostname.
pub fn node_context_from_cli(cli: &Cli) -> NodeTestContext {
    NodeTestContext {
        node_name: cli.node_name.clone().unwrap_or_default(),
        node_conformance: cli.node_conformance,
        prepull_images: cli.prepull_images,
        kubeconfig: cli.kubeconfig.clone(),
        api_server: cli.api_server.clone(),
        container_runtime: cli.container_runtime.clone(),
        report_dir: cli.report_dir.clone(),
        report_prefix: cli.report_prefix.clone(),
    }
}

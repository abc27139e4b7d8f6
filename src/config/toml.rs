//! TOML configuration file parsing

use super::*;
use crate::config::cli::Cli;
use crate::config::cli_convert::apply_cli_overrides;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

/// Parse TOML configuration file
pub fn parse_toml_file(path: &Path) -> Result<HarnessConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_toml_string(&contents)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse TOML configuration from string
pub fn parse_toml_string(contents: &str) -> Result<HarnessConfig> {
    let config: HarnessConfig = ::toml::from_str(contents)
        .context("Failed to parse TOML configuration")?;

    Ok(config)
}

/// Load the harness configuration for this invocation
///
/// Reads `--config` when given (defaults otherwise) and applies the CLI
/// overrides on top.
pub fn load_config(cli: &Cli) -> Result<HarnessConfig> {
    let mut config = match cli.config {
        Some(ref path) => parse_toml_file(path)?,
        None => HarnessConfig::default(),
    };

    apply_cli_overrides(cli, &mut config)?;

    Ok(config)
}

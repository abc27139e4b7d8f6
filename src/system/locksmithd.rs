//! CoreOS auto-reboot suppression
//!
//! locksmithd reboots CoreOS hosts after updates, which would kill a test run
//! midway. On CoreOS hosts it is masked before the suite starts. Hosts
//! without `/etc/os-release` are left alone.

use crate::error::HarnessError;
use crate::exec::{CommandRunner, CommandSpec};
use anyhow::{Context, Result};
use std::path::Path;
use tracing::info;

/// Default location of the os-release file
pub const OS_RELEASE: &str = "/etc/os-release";

/// What the masking step did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskOutcome {
    /// No readable os-release file
    NoOsRelease,
    /// Not a CoreOS host
    NotCoreos,
    /// locksmithd was masked
    Masked,
}

/// Whether an os-release file identifies CoreOS
pub fn is_coreos(os_release: &str) -> bool {
    os_release
        .lines()
        .filter_map(|line| line.trim().strip_prefix("ID="))
        .any(|id| id.trim_matches('"') == "coreos")
}

/// Mask locksmithd when `os_release` identifies a CoreOS host
///
/// A missing or unreadable file is logged and ignored. A failing `systemctl`
/// call is an error.
pub fn mask_locksmithd_on_coreos(os_release: &Path, runner: &dyn CommandRunner) -> Result<MaskOutcome> {
    let contents = match std::fs::read_to_string(os_release) {
        Ok(contents) => contents,
        Err(e) => {
            // Not all distros contain this file
            info!("Could not read {}: {}", os_release.display(), e);
            return Ok(MaskOutcome::NoOsRelease);
        }
    };

    if !is_coreos(&contents) {
        return Ok(MaskOutcome::NotCoreos);
    }

    let cmd = CommandSpec::new("systemctl").args(["mask", "--now", "locksmithd"]);
    let out = runner
        .run(&cmd)
        .context("should be able to mask locksmithd")?;
    if !out.success() {
        return Err(HarnessError::CommandFailed {
            command: cmd.to_string(),
            status: out.status_string(),
        })
        .with_context(|| format!("should be able to mask locksmithd - output: {:?}", out.output_lossy()));
    }

    info!("Locksmithd is masked successfully");
    Ok(MaskOutcome::Masked)
}

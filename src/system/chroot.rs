//! Changing the filesystem root for node conformance runs
//!
//! The containerized conformance test mounts the host root filesystem
//! read-only at [`super::ROOTFS`]. Validation chroots there so it checks the
//! host rather than the container image.

use anyhow::{Context, Result};
use std::path::Path;

/// Change the process root to `root` and move to its `/`
///
/// Requires CAP_SYS_CHROOT. Irreversible for the rest of the process.
pub fn enter_root(root: &Path) -> Result<()> {
    std::os::unix::fs::chroot(root)
        .with_context(|| format!("chroot {:?} failed", root))?;
    std::env::set_current_dir("/")
        .with_context(|| format!("chdir to / after chroot {:?} failed", root))?;

    tracing::info!(root = %root.display(), "changed filesystem root");
    Ok(())
}

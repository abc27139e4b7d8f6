//! Parallel worker synchronisation
//!
//! Parallel workers share a directory. Worker 1 (the primary) runs the
//! setup and publishes the serialized test context there; the other
//! workers wait for it. At the end each non-primary worker leaves a done
//! marker so the primary only tears the node down once everyone finished.
//!
//! Files in the sync directory:
//!
//! - `context.json`: the context bytes, written via rename
//! - `setup.failed`: the primary's setup error message
//! - `worker-<n>.done`: worker `n` finished its specs

use crate::error::HarnessError;
use crate::Result;
use anyhow::Context;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info};

const CONTEXT_FILE: &str = "context.json";
const FAILED_FILE: &str = "setup.failed";
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

pub struct WorkerSync {
    dir: PathBuf,
    node: usize,
    total: usize,
    poll: Duration,
}

impl WorkerSync {
    /// `node` is 1-based
    pub fn new(dir: impl Into<PathBuf>, node: usize, total: usize) -> Self {
        Self {
            dir: dir.into(),
            node,
            total,
            poll: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    pub fn is_primary(&self) -> bool {
        self.node == 1
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn done_marker(&self, node: usize) -> PathBuf {
        self.dir.join(format!("worker-{}.done", node))
    }

    /// Create the directory and clear what a previous run left behind
    ///
    /// The done markers go last: a worker that still sees its own marker
    /// knows the context next to it is stale.
    pub fn reset(&self) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create sync directory {}", self.dir.display()))?;

        let stale = [self.dir.join(CONTEXT_FILE), self.dir.join(FAILED_FILE)]
            .into_iter()
            .chain((2..=self.total).map(|n| self.done_marker(n)));
        for path in stale {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!("removed stale {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e).with_context(|| format!("Failed to remove {}", path.display())),
            }
        }
        Ok(())
    }

    /// Publish the context bytes to the other workers
    pub fn publish(&self, context: &[u8]) -> Result<()> {
        let tmp = self.dir.join(format!("{}.tmp", CONTEXT_FILE));
        std::fs::write(&tmp, context).with_context(|| format!("Failed to write {}", tmp.display()))?;
        std::fs::rename(&tmp, self.dir.join(CONTEXT_FILE)).context("Failed to publish test context")?;
        info!(workers = self.total, "published test context");
        Ok(())
    }

    /// Tell the other workers that setup failed
    pub fn publish_failure(&self, message: &str) -> Result<()> {
        let path = self.dir.join(FAILED_FILE);
        std::fs::write(&path, message).with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Wait for the primary's context bytes
    ///
    /// Fails with [`HarnessError::SetupAborted`] when the primary reported a
    /// setup failure. Files left by a previous run are ignored until the
    /// primary has cleared them.
    pub fn wait_for_context(&self, timeout: Duration) -> Result<Vec<u8>> {
        let context_path = self.dir.join(CONTEXT_FILE);
        let failed_path = self.dir.join(FAILED_FILE);
        let own_marker = self.done_marker(self.node);
        let deadline = Instant::now() + timeout;

        info!(node = self.node, "waiting for the primary worker to finish setup");
        let mut stale_logged = false;
        loop {
            if own_marker.exists() {
                if !stale_logged {
                    info!("sync directory holds a previous run, waiting for the primary to reset it");
                    stale_logged = true;
                }
            } else if failed_path.exists() {
                let message = std::fs::read_to_string(&failed_path).unwrap_or_default();
                return Err(HarnessError::SetupAborted(message.trim().to_string()).into());
            } else if context_path.exists() {
                return std::fs::read(&context_path)
                    .with_context(|| format!("Failed to read {}", context_path.display()));
            }
            if Instant::now() >= deadline {
                anyhow::bail!("timed out after {:?} waiting for the primary worker's setup", timeout);
            }
            std::thread::sleep(self.poll);
        }
    }

    /// Mark this worker as finished
    pub fn mark_done(&self) -> Result<()> {
        let path = self.done_marker(self.node);
        std::fs::write(&path, b"").with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Wait until every other worker has marked itself done
    pub fn wait_for_workers(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let pending: Vec<usize> = (2..=self.total)
                .filter(|&n| !self.done_marker(n).exists())
                .collect();
            if pending.is_empty() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                anyhow::bail!("workers {:?} did not finish within {:?}", pending, timeout);
            }
            std::thread::sleep(self.poll);
        }
    }
}

//! Harness error types
//!
//! Most of the harness propagates `anyhow::Error` with context. The variants
//! here are the conditions callers (and tests) need to tell apart.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    /// The node never reported Ready before the deadline
    #[error("node was not ready after {timeout:?}: {last}")]
    NodeReadyTimeout { timeout: Duration, last: String },

    /// The API returned more than one node in a single-node environment
    #[error("expected a single node, the API returned {count}: {names:?}")]
    MultipleNodes { count: usize, names: Vec<String> },

    #[error("system validation failed: {0}")]
    ValidationFailed(String),

    /// A child process ran but exited unsuccessfully
    #[error("command `{command}` failed with {status}")]
    CommandFailed { command: String, status: String },

    /// The primary worker reported a setup failure to the other workers
    #[error("setup failed on the primary worker: {0}")]
    SetupAborted(String),
}

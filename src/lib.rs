//! node-e2e - Node end-to-end test harness
//!
//! Prepares a single Kubernetes node for end-to-end tests and runs the spec
//! commands against it.
//!
//! # Architecture
//!
//! - **One binary, three roles**: test runner, services supervisor
//!   (`--run-services-mode`) and system validator (`--system-validate-mode`)
//! - **Setup once**: validation, image pre-pull, service start and the node
//!   readiness gate run on the primary worker; the other workers receive the
//!   resulting test context
//! - **Reporting**: JUnit XML per worker plus a console summary

pub mod config;
pub mod error;
pub mod exec;
pub mod images;
pub mod mode;
pub mod output;
pub mod readiness;
pub mod services;
pub mod suite;
pub mod system;

pub use config::{HarnessConfig, NodeTestContext};
pub use error::HarnessError;

/// Result type used throughout node-e2e
pub type Result<T> = anyhow::Result<T>;

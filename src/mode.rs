//! Run mode selection
//!
//! One binary serves three roles. The services supervisor and the system
//! validator are children the test runner starts by re-executing itself with
//! the matching flag.

use crate::config::cli::Cli;

/// Flag that turns the process into the services supervisor
pub const RUN_SERVICES_FLAG: &str = "--run-services-mode";

/// Flag that turns the process into the system validator
pub const SYSTEM_VALIDATE_FLAG: &str = "--system-validate-mode";

/// Flag that makes the services supervisor follow its parent's lifetime
pub const MONITOR_PARENT_FLAG: &str = "--monitor-parent";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Run the service bundle until signalled
    Services,
    /// Validate the host and exit
    SystemValidate,
    /// Set up the node and run the specs
    Suite,
}

impl RunMode {
    /// Pick the mode for this invocation
    ///
    /// The two mode flags conflict at parse time; services mode wins if both
    /// are somehow set.
    pub fn from_cli(cli: &Cli) -> Self {
        if cli.run_services_mode {
            RunMode::Services
        } else if cli.system_validate_mode {
            RunMode::SystemValidate
        } else {
            RunMode::Suite
        }
    }
}

//! CLI argument parsing using clap

use clap::{ArgAction, Parser};
use std::path::PathBuf;

/// node-e2e - Node end-to-end test harness
#[derive(Parser, Debug, Clone)]
#[command(name = "node-e2e")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Only run the service bundle (etcd, apiserver) in this process, do not run tests
    #[arg(long, hide = true, conflicts_with = "system_validate_mode")]
    pub run_services_mode: bool,

    /// Only run system validation in this process, do not run tests
    #[arg(long)]
    pub system_validate_mode: bool,

    /// Exit the service bundle when the parent test process goes away
    #[arg(long, hide = true)]
    pub monitor_parent: bool,

    /// Containerized node conformance run (host root filesystem mounted at /rootfs)
    #[arg(long)]
    pub node_conformance: bool,

    // === Node Options ===
    /// Name of the node under test (defaults to the hostname)
    #[arg(long, env = "NODE_E2E_NODE_NAME")]
    pub node_name: Option<String>,

    /// Kubeconfig used to reach the API server
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// API server URL used when no kubeconfig is given
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    pub api_server: String,

    /// Container runtime binary checked during system validation (e.g., docker)
    #[arg(long)]
    pub container_runtime: Option<String>,

    // === Setup Options ===
    /// Pre-pull the images tests depend on before running
    #[arg(long, default_value_t = true, num_args = 0..=1, default_missing_value = "true", action = ArgAction::Set)]
    pub prepull_images: bool,

    /// Start the service bundle before the tests
    #[arg(long, default_value_t = true, num_args = 0..=1, default_missing_value = "true", action = ArgAction::Set)]
    pub start_services: bool,

    /// Stop the service bundle after the tests
    #[arg(long, default_value_t = true, num_args = 0..=1, default_missing_value = "true", action = ArgAction::Set)]
    pub stop_services: bool,

    /// Time to wait for the node to become ready (e.g., 2m, 90s)
    #[arg(long)]
    pub node_ready_timeout: Option<String>,

    /// Interval between node readiness checks (e.g., 1s, 500ms)
    #[arg(long)]
    pub node_ready_poll_interval: Option<String>,

    // === Parallel Options ===
    /// Index of this parallel worker (1-based)
    #[arg(long, default_value = "1", env = "NODE_E2E_PARALLEL_NODE")]
    pub parallel_node: usize,

    /// Total number of parallel workers
    #[arg(long, default_value = "1", env = "NODE_E2E_PARALLEL_TOTAL")]
    pub parallel_total: usize,

    /// Directory shared by the parallel workers of one run
    #[arg(long)]
    pub sync_dir: Option<PathBuf>,

    // === Runner Options ===
    /// Random seed (defaults to the current time)
    #[arg(long)]
    pub seed: Option<u64>,

    /// Shuffle the order of the spec commands
    #[arg(long)]
    pub randomize_all_specs: bool,

    // === Output Options ===
    /// Directory for JUnit reports and service logs
    #[arg(long)]
    pub report_dir: Option<PathBuf>,

    /// Prefix for JUnit report file names
    #[arg(long, default_value = "")]
    pub report_prefix: String,

    /// Log filter when RUST_LOG is unset (e.g., info, debug, node_e2e=trace)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    // === Configuration File ===
    /// TOML harness configuration file
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Arguments passed through to every spec command
    #[arg(last = true)]
    pub spec_args: Vec<String>,
}

impl Cli {
    /// Parse CLI arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate CLI arguments
    pub fn validate(&self) -> anyhow::Result<()> {
        // The service bundle and validator children only need their own flags
        if self.run_services_mode || self.system_validate_mode {
            return Ok(());
        }

        if self.parallel_total == 0 {
            anyhow::bail!("parallel_total must be at least 1");
        }
        if self.parallel_node == 0 || self.parallel_node > self.parallel_total {
            anyhow::bail!(
                "parallel_node must be between 1 and {}, got {}",
                self.parallel_total,
                self.parallel_node
            );
        }
        if self.parallel_total > 1 && self.sync_dir.is_none() {
            anyhow::bail!("--sync-dir is required when running more than one parallel worker");
        }

        if self.report_prefix.contains('/') {
            anyhow::bail!("report_prefix must not contain '/'");
        }

        Ok(())
    }

    /// Whether the services are expected to stop after the tests
    pub fn services_stop_after_tests(&self) -> bool {
        self.start_services && self.stop_services
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("node-e2e").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&[]);
        assert!(!cli.run_services_mode);
        assert!(!cli.system_validate_mode);
        assert!(cli.prepull_images);
        assert!(cli.start_services);
        assert!(cli.stop_services);
        assert_eq!(cli.parallel_node, 1);
        assert_eq!(cli.report_prefix, "");
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn test_bool_flags_take_values() {
        let cli = parse(&["--prepull-images=false", "--start-services", "--stop-services", "false"]);
        assert!(!cli.prepull_images);
        assert!(cli.start_services);
        assert!(!cli.stop_services);
        assert!(!cli.services_stop_after_tests());
    }

    #[test]
    fn test_mode_flags_conflict() {
        let result = Cli::try_parse_from(["node-e2e", "--run-services-mode", "--system-validate-mode"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_spec_args_after_separator() {
        let cli = parse(&["--node-name", "n1", "--", "--focus", "Conformance"]);
        assert_eq!(cli.node_name.as_deref(), Some("n1"));
        assert_eq!(cli.spec_args, vec!["--focus", "Conformance"]);
    }

    #[test]
    fn test_validate_parallel() {
        let cli = parse(&["--parallel-node", "3", "--parallel-total", "2"]);
        assert!(cli.validate().is_err());

        let cli = parse(&["--parallel-node", "2", "--parallel-total", "2"]);
        assert!(cli.validate().is_err(), "sync dir is required");

        let cli = parse(&["--parallel-node", "2", "--parallel-total", "2", "--sync-dir", "/tmp/sync"]);
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn test_validate_skipped_in_child_modes() {
        let cli = parse(&["--system-validate-mode", "--parallel-node", "0"]);
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn test_validate_report_prefix() {
        let cli = parse(&["--report-prefix", "a/b"]);
        assert!(cli.validate().is_err());
    }
}

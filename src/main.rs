//! node-e2e CLI entry point

use anyhow::Result;
use node_e2e::config::cli::Cli;
use node_e2e::config::toml::load_config;
use node_e2e::mode::RunMode;
use node_e2e::system::{self, chroot, SystemValidator, ROOTFS};
use node_e2e::{services, suite};
use std::path::Path;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse_args();
    init_logging(&cli.log_level);
    cli.validate()?;

    match RunMode::from_cli(&cli) {
        RunMode::Services => run_services(&cli),
        RunMode::SystemValidate => run_system_validate(&cli),
        RunMode::Suite => {
            println!("node-e2e v{}", env!("CARGO_PKG_VERSION"));
            println!();
            suite::run(&cli)
        }
    }
}

/// Log to stderr, RUST_LOG taking precedence over --log-level
fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Run the service bundle until signalled
fn run_services(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    services::run_services(&config.services, cli.monitor_parent)
}

/// Validate the host and exit
fn run_system_validate(cli: &Cli) -> Result<()> {
    // Read the config before the root changes under us
    let config = load_config(cli)?;

    if cli.node_conformance {
        chroot::enter_root(Path::new(ROOTFS))?;
    }

    let validator = SystemValidator::new("/")
        .with_cgroup_subsystems(config.validation.cgroup_subsystems)
        .with_runtime(cli.container_runtime.clone());
    system::validate(&validator)
}

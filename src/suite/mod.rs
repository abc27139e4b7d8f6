//! Suite execution
//!
//! [`SuiteContext`] holds everything setup and teardown share: the node
//! test context, the harness configuration, the command runner and the
//! handle on the started services. [`run`] drives one worker through
//! setup, the spec commands, teardown and reporting.

pub mod runner;
pub mod sync;

use crate::config::cli::Cli;
use crate::config::cli_convert::node_context_from_cli;
use crate::config::toml::load_config;
use crate::config::validator::validate_config;
use crate::config::{HarnessConfig, NodeTestContext};
use crate::exec::{current_args, current_exe, CommandRunner, SystemRunner};
use crate::images::ImagePuller;
use crate::output::junit::JUnitReporter;
use crate::output::text::print_summary;
use crate::readiness::{wait_for_node_ready, KubeNodeLister, NodeLister};
use crate::services::E2EServices;
use crate::system::locksmithd::{mask_locksmithd_on_coreos, OS_RELEASE};
use crate::system::reexec::validate_system;
use anyhow::{Context, Result};
use runner::{order_specs, SpecRunner, SuiteReport, ENV_CONTEXT, ENV_PARALLEL_NODE, ENV_RANDOM_SEED};
use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use sync::WorkerSync;
use tracing::{error, info, warn};

/// Suite name used in reports
pub const SUITE_NAME: &str = "E2eNode Suite";

/// Name the setup is reported under when it fails
pub const SETUP_SPEC_NAME: &str = "[SynchronizedBeforeSuite]";

/// Name a failure to prepare the spec commands is reported under
pub const SPECS_SETUP_NAME: &str = "[SpecCommands]";

/// Extra time non-primary workers give the primary's setup beyond the
/// readiness timeout (image pulls, service start)
const SETUP_WAIT_MARGIN: Duration = Duration::from_secs(600);

/// How long the primary waits for the other workers before teardown
const WORKERS_WAIT_TIMEOUT: Duration = Duration::from_secs(3600);

/// State shared by setup and teardown of one worker
pub struct SuiteContext {
    pub node: NodeTestContext,
    config: HarnessConfig,
    start_services: bool,
    stop_services: bool,
    runner: Arc<dyn CommandRunner>,
    exe: PathBuf,
    args: Vec<OsString>,
    os_release: PathBuf,
    context_dir: PathBuf,
    services: Option<E2EServices>,
    lister: Option<Box<dyn NodeLister>>,
}

impl SuiteContext {
    pub fn new(cli: &Cli, config: HarnessConfig, runner: Arc<dyn CommandRunner>) -> Result<Self> {
        Ok(Self {
            node: node_context_from_cli(cli),
            config,
            start_services: cli.start_services,
            stop_services: cli.stop_services,
            runner,
            exe: current_exe()?,
            args: current_args(),
            os_release: PathBuf::from(OS_RELEASE),
            context_dir: std::env::temp_dir(),
            services: None,
            lister: None,
        })
    }

    /// Binary and arguments used for the validation and services children
    pub fn with_exe(mut self, exe: impl Into<PathBuf>, args: Vec<OsString>) -> Self {
        self.exe = exe.into();
        self.args = args;
        self
    }

    pub fn with_os_release(mut self, path: impl Into<PathBuf>) -> Self {
        self.os_release = path.into();
        self
    }

    /// Directory for the context file handed to spec commands
    pub fn with_context_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.context_dir = dir.into();
        self
    }

    /// Use `lister` instead of a cluster client built from the context
    pub fn with_node_lister(mut self, lister: Box<dyn NodeLister>) -> Self {
        self.lister = Some(lister);
        self
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Prepare the node; returns the serialized context for the other workers
    ///
    /// Every step must succeed except the os-release inspection, which
    /// tolerates a missing file.
    pub async fn setup(&mut self) -> Result<Vec<u8>> {
        if self.node.node_name.is_empty() {
            self.node.node_name = hostname::get()
                .context("Could not get node name")?
                .to_string_lossy()
                .into_owned();
        }
        info!(node = %self.node.node_name, "Node name resolved");

        info!("Running system validation");
        validate_system(self.runner.as_ref(), &self.exe, &self.args)?;

        if self.node.prepull_images {
            info!(count = self.config.images.list.len(), "Pre-pulling images so that they are cached for the tests");
            ImagePuller::new(self.runner.as_ref(), &self.config.images)
                .prepull_all(&self.config.images.list)
                .context("Failed to pre-pull images")?;
        }

        mask_locksmithd_on_coreos(&self.os_release, self.runner.as_ref())?;

        if self.start_services {
            info!("Starting node services");
            let mut services = E2EServices::new(self.stop_services, &self.config.services);
            // Without a usable report directory the services log to our output
            let log_dir = self.node.report_dir.as_deref().filter(|dir| dir.is_dir());
            services
                .start(&self.exe, &self.args, log_dir)
                .context("Failed to start node services")?;
            self.services = Some(services);
        }

        let readiness = self.config.readiness;
        info!(timeout = ?readiness.timeout(), "Waiting for the node to be ready");
        let lister = match self.lister.take() {
            Some(lister) => lister,
            None => Box::new(KubeNodeLister::from_context(&self.node).await?) as Box<dyn NodeLister>,
        };
        let ready = wait_for_node_ready(lister.as_ref(), readiness.timeout(), readiness.poll_interval()).await;
        self.lister = Some(lister);
        ready.context("Node never became ready")?;

        self.node.to_bytes()
    }

    /// Take over the context the primary worker published
    pub fn adopt(&mut self, context: &[u8]) -> Result<()> {
        self.node = NodeTestContext::from_bytes(context)?;
        info!(node = %self.node.node_name, "Using the primary worker's test context");
        Ok(())
    }

    /// Stop the services if this suite started them and should stop them
    pub fn teardown(&mut self) -> Result<()> {
        if self.start_services && self.stop_services {
            if let Some(ref mut services) = self.services {
                info!("Stopping node services...");
                services.stop()?;
            }
        }
        info!("Tests Finished");
        Ok(())
    }

    pub fn services_running(&mut self) -> bool {
        self.services.as_mut().map_or(false, |s| s.is_running())
    }
}

/// Run setup once across workers
fn synchronized_setup(
    runtime: &tokio::runtime::Runtime,
    suite: &mut SuiteContext,
    sync: Option<&WorkerSync>,
) -> Result<()> {
    if let Some(sync) = sync.filter(|s| !s.is_primary()) {
        let wait = suite.config().readiness.timeout() + SETUP_WAIT_MARGIN;
        let context = sync.wait_for_context(wait)?;
        return suite.adopt(&context);
    }

    if let Some(sync) = sync {
        sync.reset()?;
    }

    match runtime.block_on(suite.setup()) {
        Ok(context) => {
            if let Some(sync) = sync {
                sync.publish(&context)?;
            }
            Ok(())
        }
        Err(e) => {
            if let Some(sync) = sync {
                if let Err(publish_err) = sync.publish_failure(&format!("{:#}", e)) {
                    warn!("Failed to report the setup failure to other workers: {:#}", publish_err);
                }
            }
            Err(e)
        }
    }
}

fn run_specs(suite: &SuiteContext, cli: &Cli, seed: u64) -> Result<Vec<runner::SpecOutcome>> {
    let specs = order_specs(&suite.config().runner.specs, seed, cli.randomize_all_specs);
    if specs.is_empty() {
        info!("No spec commands configured");
        return Ok(Vec::new());
    }

    // Spec commands read the context from this file
    let mut context_file = tempfile::Builder::new()
        .prefix("node-e2e-context-")
        .suffix(".json")
        .tempfile_in(&suite.context_dir)
        .with_context(|| format!("Failed to create test context file in {}", suite.context_dir.display()))?;
    context_file.write_all(&suite.node.to_bytes()?)?;
    context_file.flush()?;

    let runner = SpecRunner::new(suite.runner.as_ref(), &cli.spec_args)
        .env(ENV_RANDOM_SEED, seed.to_string())
        .env(ENV_CONTEXT, context_file.path().to_string_lossy())
        .env(ENV_PARALLEL_NODE, cli.parallel_node.to_string());

    info!(count = specs.len(), randomized = cli.randomize_all_specs, "Running specs");
    Ok(runner.run_all(&specs))
}

/// Wait for the other workers (primary) or tell the primary we are done
fn finish_workers(sync: Option<&WorkerSync>) {
    let sync = match sync {
        Some(sync) => sync,
        None => return,
    };
    let result = if sync.is_primary() {
        sync.wait_for_workers(WORKERS_WAIT_TIMEOUT)
    } else {
        sync.mark_done()
    };
    if let Err(e) = result {
        warn!("Worker synchronisation: {:#}", e);
    }
}

/// Setup, specs, worker hand-off and teardown of one worker
///
/// The hand-off and teardown run whatever failed before them. The error is
/// the one that kept the specs from running.
fn run_worker(
    runtime: &tokio::runtime::Runtime,
    suite: &mut SuiteContext,
    sync: Option<&WorkerSync>,
    cli: &Cli,
    seed: u64,
) -> (SuiteReport, Option<anyhow::Error>) {
    let started = chrono::Utc::now();
    let clock = std::time::Instant::now();

    let (mut report, run_error) = match synchronized_setup(runtime, suite, sync) {
        Ok(()) => match run_specs(suite, cli, seed) {
            Ok(outcomes) => {
                let mut report = SuiteReport::new(SUITE_NAME, started);
                report.outcomes = outcomes;
                (report, None)
            }
            Err(e) => {
                error!("Preparing the spec commands failed: {:#}", e);
                let report =
                    SuiteReport::setup_failed(SUITE_NAME, started, SPECS_SETUP_NAME, &e, &suite.config().runner.specs);
                (report, Some(e))
            }
        },
        Err(e) => {
            error!("Setup failed: {:#}", e);
            let report =
                SuiteReport::setup_failed(SUITE_NAME, started, SETUP_SPEC_NAME, &e, &suite.config().runner.specs);
            (report, Some(e))
        }
    };
    report.duration = clock.elapsed();

    finish_workers(sync);
    if sync.map_or(true, |s| s.is_primary()) {
        if let Err(e) = suite.teardown() {
            warn!("Teardown failed: {:#}", e);
        }
    }

    (report, run_error)
}

fn report_dir_reporter(cli: &Cli) -> Option<JUnitReporter> {
    cli.report_dir
        .as_deref()
        .and_then(|dir: &Path| JUnitReporter::for_report_dir(dir, &cli.report_prefix, cli.parallel_node))
}

/// Run the suite on this worker
pub fn run(cli: &Cli) -> Result<()> {
    let config = load_config(cli)?;
    validate_config(&config).context("Configuration validation failed")?;

    let seed = cli
        .seed
        .unwrap_or_else(|| chrono::Utc::now().timestamp().unsigned_abs());
    info!(seed, node = cli.parallel_node, total = cli.parallel_total, "Running {}", SUITE_NAME);

    let reporter = report_dir_reporter(cli);
    let sync = cli
        .sync_dir
        .as_ref()
        .map(|dir| WorkerSync::new(dir, cli.parallel_node, cli.parallel_total));

    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
    let mut suite = SuiteContext::new(cli, config, runner)?;
    let runtime = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;

    let (report, run_error) = run_worker(&runtime, &mut suite, sync.as_ref(), cli, seed);

    if let Some(reporter) = reporter {
        if let Err(e) = reporter.write(&report) {
            error!("{:#}", e);
        }
    }
    print_summary(&report);

    if let Some(e) = run_error {
        return Err(e);
    }
    if !report.passed() {
        anyhow::bail!(
            "{} of {} specs failed",
            report.failures().count(),
            report.outcomes.len()
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpecCommand;
    use runner::SpecStatus;
    use crate::error::HarnessError;
    use crate::exec::mock::MockRunner;
    use crate::mode::SYSTEM_VALIDATE_FLAG;
    use async_trait::async_trait;
    use clap::Parser;
    use k8s_openapi::api::core::v1::{Node, NodeCondition, NodeStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    struct ReadyLister;

    #[async_trait]
    impl NodeLister for ReadyLister {
        async fn list_nodes(&self) -> Result<Option<Vec<Node>>> {
            Ok(Some(vec![Node {
                metadata: ObjectMeta {
                    name: Some("node-1".to_string()),
                    ..Default::default()
                },
                status: Some(NodeStatus {
                    conditions: Some(vec![NodeCondition {
                        type_: "Ready".to_string(),
                        status: "True".to_string(),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
                ..Default::default()
            }]))
        }
    }

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("node-e2e").chain(args.iter().copied())).unwrap()
    }

    fn fake_harness(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("fake-harness");
        std::fs::write(&path, "#!/bin/sh\nexec sleep 30\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn suite(dir: &TempDir, args: &[&str], runner: &MockRunner) -> SuiteContext {
        let cli = cli(args);
        let mut config = HarnessConfig::default();
        config.services.clear();
        let parent_args = args.iter().map(OsString::from).collect();

        SuiteContext::new(&cli, config, Arc::new(runner.clone()))
            .unwrap()
            .with_exe(fake_harness(dir), parent_args)
            .with_os_release(dir.path().join("os-release"))
            .with_node_lister(Box::new(ReadyLister))
    }

    #[tokio::test]
    async fn test_setup_runs_validation_then_masks_on_coreos() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("os-release"), "ID=coreos\n").unwrap();
        let runner = MockRunner::new();
        let args = ["--prepull-images=false", "--start-services=false", "--node-name", "n1"];
        let mut suite = suite(&dir, &args, &runner);

        let bytes = suite.setup().await.unwrap();
        let context = NodeTestContext::from_bytes(&bytes).unwrap();
        assert_eq!(context.node_name, "n1");

        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].args[0], OsString::from(SYSTEM_VALIDATE_FLAG));
        assert_eq!(calls[0].args.len(), args.len() + 1);
        assert_eq!(calls[1].to_string(), "systemctl mask --now locksmithd");
    }

    #[tokio::test]
    async fn test_setup_resolves_hostname_and_prepulls() {
        let dir = TempDir::new().unwrap();
        let runner = MockRunner::new();
        let mut suite = suite(&dir, &["--start-services=false"], &runner);

        suite.setup().await.unwrap();
        assert!(!suite.node.node_name.is_empty());
        // validation plus one pull per default image, no mask without os-release
        let images = suite.config().images.list.len();
        assert_eq!(runner.call_count(), 1 + images);
        assert_eq!(runner.count_program("docker"), images);
    }

    #[tokio::test]
    async fn test_validation_failure_aborts_setup() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("os-release"), "ID=coreos\n").unwrap();
        let runner = MockRunner::new();
        runner.push_exit(1, "KERNEL_VERSION: 2.6.32 (FAIL)\n");
        let mut suite = suite(&dir, &["--node-name", "n1"], &runner);

        let err = suite.setup().await.unwrap_err();
        assert!(matches!(err.downcast_ref::<HarnessError>(), Some(HarnessError::ValidationFailed(_))));
        assert_eq!(runner.call_count(), 1, "nothing runs after a failed validation");
        assert!(!suite.services_running());
    }

    #[tokio::test]
    async fn test_teardown_stops_services_when_asked() {
        let dir = TempDir::new().unwrap();
        let runner = MockRunner::new();
        let mut suite = suite(&dir, &["--prepull-images=false", "--node-name", "n1"], &runner);

        suite.setup().await.unwrap();
        assert!(suite.services_running());

        suite.teardown().unwrap();
        assert!(!suite.services_running());
    }

    #[tokio::test]
    async fn test_teardown_leaves_services_without_stop() {
        let dir = TempDir::new().unwrap();
        let runner = MockRunner::new();
        let mut suite = suite(
            &dir,
            &["--prepull-images=false", "--stop-services=false", "--node-name", "n1"],
            &runner,
        );

        suite.setup().await.unwrap();
        suite.teardown().unwrap();
        assert!(suite.services_running());

        suite.services.take().unwrap().stop().unwrap();
    }

    #[test]
    fn test_teardown_without_start_is_noop() {
        let dir = TempDir::new().unwrap();
        let runner = MockRunner::new();
        let mut suite = suite(&dir, &["--start-services=false"], &runner);

        suite.teardown().unwrap();
        assert!(!suite.services_running());
        assert_eq!(runner.call_count(), 0);
    }

    #[test]
    fn test_non_primary_adopts_published_context() {
        let dir = TempDir::new().unwrap();
        let sync_dir = dir.path().join("sync");
        let runner = MockRunner::new();
        let runtime = tokio::runtime::Runtime::new().unwrap();

        let primary_sync = WorkerSync::new(&sync_dir, 1, 2);
        let mut primary = suite(&dir, &["--prepull-images=false", "--start-services=false", "--node-name", "n1"], &runner);
        synchronized_setup(&runtime, &mut primary, Some(&primary_sync)).unwrap();

        let worker_sync = WorkerSync::new(&sync_dir, 2, 2);
        let mut worker = suite(&dir, &["--start-services=false"], &runner);
        synchronized_setup(&runtime, &mut worker, Some(&worker_sync)).unwrap();

        assert_eq!(worker.node, primary.node);
        assert_eq!(runner.call_count(), 1, "only the primary validates the system");
    }

    #[test]
    fn test_setup_failure_reaches_other_workers() {
        let dir = TempDir::new().unwrap();
        let sync_dir = dir.path().join("sync");
        let runner = MockRunner::new();
        runner.push_exit(1, "");
        let runtime = tokio::runtime::Runtime::new().unwrap();

        let mut primary = suite(&dir, &["--node-name", "n1"], &runner);
        assert!(synchronized_setup(&runtime, &mut primary, Some(&WorkerSync::new(&sync_dir, 1, 2))).is_err());

        let mut worker = suite(&dir, &[], &runner);
        let err = synchronized_setup(&runtime, &mut worker, Some(&WorkerSync::new(&sync_dir, 2, 2))).unwrap_err();
        assert!(matches!(err.downcast_ref::<HarnessError>(), Some(HarnessError::SetupAborted(_))));
    }

    /// One spec and a context directory the spec runner cannot write to
    fn unrunnable_specs(suite: SuiteContext, dir: &TempDir) -> SuiteContext {
        let mut suite = suite.with_context_dir(dir.path().join("missing").join("context"));
        suite.config.runner.specs = vec![SpecCommand {
            name: "kubelet".to_string(),
            command: vec!["true".to_string()],
        }];
        suite
    }

    #[test]
    fn test_spec_runner_failure_still_marks_worker_done() {
        let dir = TempDir::new().unwrap();
        let sync_dir = dir.path().join("sync");
        let runner = MockRunner::new();
        let runtime = tokio::runtime::Runtime::new().unwrap();

        let primary_sync = WorkerSync::new(&sync_dir, 1, 2);
        let mut primary = suite(&dir, &["--prepull-images=false", "--start-services=false", "--node-name", "n1"], &runner);
        synchronized_setup(&runtime, &mut primary, Some(&primary_sync)).unwrap();

        let args = ["--start-services=false"];
        let mut worker = unrunnable_specs(suite(&dir, &args, &runner), &dir);
        let (report, err) = run_worker(&runtime, &mut worker, Some(&WorkerSync::new(&sync_dir, 2, 2)), &cli(&args), 7);

        assert!(format!("{:#}", err.unwrap()).contains("context file"));
        assert_eq!(report.outcomes.len(), 2);
        assert_eq!(report.outcomes[0].name, SPECS_SETUP_NAME);
        assert_eq!(report.outcomes[0].status, SpecStatus::Failed);
        assert_eq!(report.outcomes[1].status, SpecStatus::Skipped);
        primary_sync.wait_for_workers(Duration::from_secs(1)).unwrap();
    }

    #[test]
    fn test_spec_runner_failure_still_stops_services() {
        let dir = TempDir::new().unwrap();
        let runner = MockRunner::new();
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let args = ["--prepull-images=false", "--node-name", "n1"];

        let mut primary = unrunnable_specs(suite(&dir, &args, &runner), &dir);
        let (report, err) = run_worker(&runtime, &mut primary, None, &cli(&args), 7);

        assert!(err.is_some());
        assert!(!report.passed());
        assert!(primary.services.is_some(), "services were started by setup");
        assert!(!primary.services_running());
    }
}

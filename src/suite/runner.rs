//! Spec command execution
//!
//! The specs themselves are external commands. Each one is run to
//! completion with the node test context in its environment; its exit
//! status decides pass or fail.

use crate::config::SpecCommand;
use crate::exec::{CommandRunner, CommandSpec};
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Environment variable carrying the random seed
pub const ENV_RANDOM_SEED: &str = "NODE_E2E_RANDOM_SEED";
/// Environment variable carrying the path of the serialized test context
pub const ENV_CONTEXT: &str = "NODE_E2E_CONTEXT";
/// Environment variable carrying the 1-based worker index
pub const ENV_PARALLEL_NODE: &str = "NODE_E2E_PARALLEL_NODE";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecStatus {
    Passed,
    Failed,
    Skipped,
}

/// Result of one spec
#[derive(Debug, Clone)]
pub struct SpecOutcome {
    pub name: String,
    pub status: SpecStatus,
    pub duration: Duration,
    /// Combined output of the spec command
    pub output: String,
    /// Failure or skip message
    pub message: Option<String>,
}

impl SpecOutcome {
    pub fn skipped(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            status: SpecStatus::Skipped,
            duration: Duration::ZERO,
            output: String::new(),
            message: Some(message.to_string()),
        }
    }
}

/// Everything one worker ran
#[derive(Debug, Clone)]
pub struct SuiteReport {
    pub suite_name: String,
    pub started: DateTime<Utc>,
    pub duration: Duration,
    pub outcomes: Vec<SpecOutcome>,
}

impl SuiteReport {
    pub fn new(suite_name: &str, started: DateTime<Utc>) -> Self {
        Self {
            suite_name: suite_name.to_string(),
            started,
            duration: Duration::ZERO,
            outcomes: Vec::new(),
        }
    }

    /// Report for a run whose setup failed: the setup is the one failure
    /// and every spec is skipped
    pub fn setup_failed(
        suite_name: &str,
        started: DateTime<Utc>,
        setup_name: &str,
        error: &anyhow::Error,
        specs: &[SpecCommand],
    ) -> Self {
        let mut report = Self::new(suite_name, started);
        report.outcomes.push(SpecOutcome {
            name: setup_name.to_string(),
            status: SpecStatus::Failed,
            duration: Duration::ZERO,
            output: String::new(),
            message: Some(format!("{:#}", error)),
        });
        report.outcomes.extend(
            specs
                .iter()
                .map(|spec| SpecOutcome::skipped(&spec.name, "setup failed")),
        );
        report
    }

    pub fn count(&self, status: SpecStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    pub fn passed(&self) -> bool {
        self.count(SpecStatus::Failed) == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &SpecOutcome> {
        self.outcomes.iter().filter(|o| o.status == SpecStatus::Failed)
    }
}

/// Order the specs, shuffling them with `seed` when requested
pub fn order_specs(specs: &[SpecCommand], seed: u64, randomize: bool) -> Vec<SpecCommand> {
    let mut ordered = specs.to_vec();
    if randomize {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);
        ordered.shuffle(&mut rng);
    }
    ordered
}

/// Runs spec commands one after another
pub struct SpecRunner<'a> {
    runner: &'a dyn CommandRunner,
    extra_args: &'a [String],
    env: Vec<(String, String)>,
}

impl<'a> SpecRunner<'a> {
    /// `extra_args` are appended to every spec command
    pub fn new(runner: &'a dyn CommandRunner, extra_args: &'a [String]) -> Self {
        Self {
            runner,
            extra_args,
            env: Vec::new(),
        }
    }

    pub fn env(mut self, key: &str, value: impl Into<String>) -> Self {
        self.env.push((key.to_string(), value.into()));
        self
    }

    pub fn run_all(&self, specs: &[SpecCommand]) -> Vec<SpecOutcome> {
        specs.iter().map(|spec| self.run(spec)).collect()
    }

    /// Run one spec; the output is echoed once it finishes
    pub fn run(&self, spec: &SpecCommand) -> SpecOutcome {
        let start = Instant::now();
        let mut outcome = SpecOutcome {
            name: spec.name.clone(),
            status: SpecStatus::Failed,
            duration: Duration::ZERO,
            output: String::new(),
            message: None,
        };

        let (program, args) = match spec.command.split_first() {
            Some(split) => split,
            None => {
                outcome.message = Some("spec command is empty".to_string());
                return outcome;
            }
        };

        let mut cmd = CommandSpec::new(program).args(args).args(self.extra_args);
        for (key, value) in &self.env {
            cmd = cmd.env(key.clone(), value.clone());
        }

        info!(spec = %spec.name, "running {}", cmd);
        match self.runner.run(&cmd) {
            Ok(out) => {
                outcome.output = out.output_lossy();
                print!("{}", outcome.output);
                if out.success() {
                    outcome.status = SpecStatus::Passed;
                } else {
                    outcome.message = Some(format!("{} failed with {}", spec.name, out.status_string()));
                }
            }
            Err(e) => {
                outcome.message = Some(format!("{:#}", e));
            }
        }
        outcome.duration = start.elapsed();

        match outcome.status {
            SpecStatus::Passed => info!(spec = %spec.name, duration = ?outcome.duration, "spec passed"),
            _ => error!(
                spec = %spec.name,
                "spec failed: {}",
                outcome.message.as_deref().unwrap_or_default()
            ),
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::mock::MockRunner;

    fn spec(name: &str, command: &[&str]) -> SpecCommand {
        SpecCommand {
            name: name.to_string(),
            command: command.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn specs() -> Vec<SpecCommand> {
        (0..8).map(|i| spec(&format!("spec-{}", i), &["true"])).collect()
    }

    #[test]
    fn test_order_specs_keeps_order_without_randomize() {
        let specs = specs();
        assert_eq!(order_specs(&specs, 42, false), specs);
    }

    #[test]
    fn test_order_specs_is_seeded() {
        let specs = specs();
        let a = order_specs(&specs, 42, true);
        let b = order_specs(&specs, 42, true);
        assert_eq!(a, b);

        let mut names: Vec<_> = a.iter().map(|s| s.name.clone()).collect();
        names.sort();
        let mut expected: Vec<_> = specs.iter().map(|s| s.name.clone()).collect();
        expected.sort();
        assert_eq!(names, expected);
    }

    #[test]
    fn test_run_passes_args_and_env() {
        let runner = MockRunner::new();
        let extra = vec!["--focus".to_string(), "Kubelet".to_string()];
        let spec_runner = SpecRunner::new(&runner, &extra).env(ENV_RANDOM_SEED, "7");

        let outcome = spec_runner.run(&spec("kubelet", &["/bin/e2e-specs", "-v"]));
        assert_eq!(outcome.status, SpecStatus::Passed);

        let calls = runner.calls();
        assert_eq!(calls[0].to_string(), "/bin/e2e-specs -v --focus Kubelet");
        assert_eq!(calls[0].env, vec![(ENV_RANDOM_SEED.to_string(), "7".to_string())]);
    }

    #[test]
    fn test_run_failure_and_launch_error() {
        let runner = MockRunner::new();
        runner.push_exit(2, "assertion failed\n");
        runner.push_launch_error("No such file or directory");
        let spec_runner = SpecRunner::new(&runner, &[]);

        let outcomes = spec_runner.run_all(&[spec("a", &["a"]), spec("b", &["b"]), spec("c", &[])]);
        assert_eq!(outcomes[0].status, SpecStatus::Failed);
        assert_eq!(outcomes[0].output, "assertion failed\n");
        assert_eq!(outcomes[0].message.as_deref(), Some("a failed with exit status 2"));
        assert_eq!(outcomes[1].status, SpecStatus::Failed);
        assert!(outcomes[1].message.as_deref().unwrap().contains("No such file"));
        assert_eq!(outcomes[2].message.as_deref(), Some("spec command is empty"));
        assert_eq!(runner.call_count(), 2);
    }

    #[test]
    fn test_setup_failed_report() {
        let err = anyhow::anyhow!("node was not ready");
        let report = SuiteReport::setup_failed(
            "E2eNode Suite",
            Utc::now(),
            "[SynchronizedBeforeSuite]",
            &err,
            &[spec("a", &["a"]), spec("b", &["b"])],
        );

        assert!(!report.passed());
        assert_eq!(report.count(SpecStatus::Failed), 1);
        assert_eq!(report.count(SpecStatus::Skipped), 2);
        assert_eq!(report.failures().next().unwrap().name, "[SynchronizedBeforeSuite]");
    }
}

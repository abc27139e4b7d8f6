//! System validation
//!
//! Pre-flight checks that the host meets the node agent's prerequisites.
//! The checks run in a separate process (`--system-validate-mode`, see
//! [`reexec`]) so a conformance run can chroot into the host filesystem
//! first without affecting the test process.
//!
//! Every path is resolved below a root directory, so the same checks work
//! against `/`, against the chrooted `/rootfs`, and against a fake tree in
//! tests.
//!
//! # Report Format
//!
//! ```text
//! OS: Linux
//! KERNEL_VERSION: 5.15.0-91-generic
//! CGROUPS_CPU: enabled
//! CGROUPS_MEMORY: missing (FAIL)
//! RUNTIME: /usr/bin/docker
//! ```

pub mod chroot;
pub mod locksmithd;
pub mod reexec;

use crate::error::HarnessError;
use anyhow::Result;
use std::fs;
use std::path::PathBuf;

/// Mount point of the host root filesystem in containerized conformance runs
pub const ROOTFS: &str = "/rootfs";

/// Outcome of one check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckStatus {
    Pass,
    Fail,
}

/// One line of the validation report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub name: String,
    pub value: String,
    pub status: CheckStatus,
}

impl CheckResult {
    fn pass(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            status: CheckStatus::Pass,
        }
    }

    fn fail(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            status: CheckStatus::Fail,
        }
    }
}

/// All check results of a validation run
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub results: Vec<CheckResult>,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.results.iter().all(|r| r.status == CheckStatus::Pass)
    }

    pub fn failures(&self) -> Vec<&CheckResult> {
        self.results
            .iter()
            .filter(|r| r.status == CheckStatus::Fail)
            .collect()
    }

    /// Render the report, one `NAME: value` line per check
    pub fn render(&self) -> String {
        let mut out = String::new();
        for result in &self.results {
            let marker = match result.status {
                CheckStatus::Pass => "",
                CheckStatus::Fail => " (FAIL)",
            };
            out.push_str(&format!("{}: {}{}\n", result.name, result.value, marker));
        }
        out
    }
}

/// Host prerequisite checker
#[derive(Debug, Clone)]
pub struct SystemValidator {
    /// Root every absolute path is resolved under
    root: PathBuf,
    /// Cgroup subsystems that must be enabled
    cgroup_subsystems: Vec<String>,
    /// Container runtime binary that must be present
    runtime: Option<String>,
    /// Directories searched for the runtime binary
    search_path: Vec<PathBuf>,
}

impl SystemValidator {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let search_path = std::env::var_os("PATH")
            .map(|p| std::env::split_paths(&p).collect())
            .unwrap_or_else(|| vec![PathBuf::from("/usr/bin"), PathBuf::from("/bin")]);

        Self {
            root: root.into(),
            cgroup_subsystems: Vec::new(),
            runtime: None,
            search_path,
        }
    }

    pub fn with_cgroup_subsystems(mut self, subsystems: Vec<String>) -> Self {
        self.cgroup_subsystems = subsystems;
        self
    }

    pub fn with_runtime(mut self, runtime: Option<String>) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn with_search_path(mut self, search_path: Vec<PathBuf>) -> Self {
        self.search_path = search_path;
        self
    }

    /// Run every check
    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();
        report.results.push(self.check_os());
        report.results.push(self.check_kernel());
        report.results.extend(self.check_cgroups());
        if let Some(result) = self.check_runtime() {
            report.results.push(result);
        }
        report
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    fn read(&self, path: &str) -> Option<String> {
        fs::read_to_string(self.resolve(path)).ok()
    }

    fn check_os(&self) -> CheckResult {
        match self.read("/proc/sys/kernel/ostype") {
            Some(os) if os.trim() == "Linux" => CheckResult::pass("OS", "Linux"),
            Some(os) => CheckResult::fail("OS", os.trim()),
            None => CheckResult::fail("OS", "unknown"),
        }
    }

    fn check_kernel(&self) -> CheckResult {
        let release = match self.read("/proc/sys/kernel/osrelease") {
            Some(release) => release.trim().to_string(),
            None => return CheckResult::fail("KERNEL_VERSION", "unknown"),
        };

        if kernel_release_supported(&release) {
            CheckResult::pass("KERNEL_VERSION", release)
        } else {
            CheckResult::fail("KERNEL_VERSION", release)
        }
    }

    fn check_cgroups(&self) -> Vec<CheckResult> {
        let contents = self.read("/proc/cgroups").unwrap_or_default();
        let enabled = enabled_cgroup_subsystems(&contents);

        self.cgroup_subsystems
            .iter()
            .map(|subsystem| {
                let name = format!("CGROUPS_{}", subsystem.to_uppercase());
                if enabled.iter().any(|s| s == subsystem) {
                    CheckResult::pass(name, "enabled")
                } else {
                    CheckResult::fail(name, "missing")
                }
            })
            .collect()
    }

    fn check_runtime(&self) -> Option<CheckResult> {
        let runtime = self.runtime.as_ref()?;

        let found = self
            .search_path
            .iter()
            .map(|dir| self.resolve(&dir.join(runtime).to_string_lossy()))
            .find(|candidate| candidate.is_file());

        Some(match found {
            Some(path) => CheckResult::pass("RUNTIME", path.to_string_lossy()),
            None => CheckResult::fail("RUNTIME", format!("{} not found", runtime)),
        })
    }
}

/// Kernel 3.10 or newer
pub fn kernel_release_supported(release: &str) -> bool {
    let mut parts = release.split(|c: char| c == '.' || c == '-');
    let major = parts.next().and_then(|p| p.parse::<u32>().ok());
    let minor = parts.next().and_then(|p| {
        let digits: String = p.chars().take_while(|c| c.is_ascii_digit()).collect();
        digits.parse::<u32>().ok()
    });

    match (major, minor) {
        (Some(major), _) if major > 3 => true,
        (Some(3), Some(minor)) => minor >= 10,
        _ => false,
    }
}

/// Subsystem names marked enabled in `/proc/cgroups`
///
/// ```text
/// #subsys_name    hierarchy       num_cgroups     enabled
/// cpuset  0       1       1
/// ```
pub fn enabled_cgroup_subsystems(contents: &str) -> Vec<String> {
    contents
        .lines()
        .filter(|line| !line.starts_with('#'))
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() >= 4 && fields[3] == "1" {
                Some(fields[0].to_string())
            } else {
                None
            }
        })
        .collect()
}

/// Run the validator, print its report and fail if any check failed
pub fn validate(validator: &SystemValidator) -> Result<()> {
    let report = validator.validate();
    print!("{}", report.render());

    if !report.passed() {
        let failed: Vec<String> = report
            .failures()
            .iter()
            .map(|r| format!("{}={}", r.name, r.value))
            .collect();
        return Err(HarnessError::ValidationFailed(failed.join(", ")).into());
    }

    Ok(())
}

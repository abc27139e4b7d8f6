//! Configuration module
//!
//! Handles CLI argument parsing, the optional TOML harness file, and
//! validation. Also defines the node test context that the primary worker
//! broadcasts to every other parallel worker.

pub mod cli;
pub mod cli_convert;
pub mod toml;
pub mod validator;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Node test context
///
/// Resolved once during setup (node name in particular) and serialized to
/// JSON for the other workers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTestContext {
    /// Name of the node under test
    pub node_name: String,
    /// Running the containerized node conformance test
    #[serde(default)]
    pub node_conformance: bool,
    /// Images were pre-pulled during setup
    #[serde(default)]
    pub prepull_images: bool,
    /// Kubeconfig used to reach the API server
    pub kubeconfig: Option<PathBuf>,
    /// API server URL used when no kubeconfig is given
    pub api_server: String,
    /// Container runtime binary on the node
    pub container_runtime: Option<String>,
    /// JUnit report directory
    pub report_dir: Option<PathBuf>,
    /// JUnit report file prefix
    #[serde(default)]
    pub report_prefix: String,
}

impl NodeTestContext {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("should be able to serialize node test context")
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).context("should be able to deserialize node test context")
    }
}

/// Harness configuration file
///
/// Every section is optional; missing sections take the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    #[serde(default)]
    pub images: ImageConfig,
    #[serde(default = "default_services")]
    pub services: Vec<ServiceConfig>,
    #[serde(default)]
    pub readiness: ReadinessConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            images: ImageConfig::default(),
            services: default_services(),
            readiness: ReadinessConfig::default(),
            runner: RunnerConfig::default(),
            validation: ValidationConfig::default(),
        }
    }
}

/// Images pre-pulled before the suite
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    /// Images the tests depend on
    #[serde(default = "default_images")]
    pub list: Vec<String>,
    /// Pull command; the image name is appended
    #[serde(default = "default_pull_command")]
    pub pull_command: Vec<String>,
    /// Attempts per image
    #[serde(default = "default_pull_attempts")]
    pub max_attempts: u32,
    /// Delay between attempts (milliseconds)
    #[serde(default = "default_pull_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            list: default_images(),
            pull_command: default_pull_command(),
            max_attempts: default_pull_attempts(),
            retry_delay_ms: default_pull_retry_delay_ms(),
        }
    }
}

impl ImageConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

fn default_images() -> Vec<String> {
    [
        "gcr.io/google_containers/busybox:1.24",
        "gcr.io/google_containers/nginx-slim:0.7",
        "gcr.io/google_containers/pause-amd64:3.0",
        "gcr.io/google_containers/serve_hostname:v1.4",
        "gcr.io/google_containers/mounttest:0.7",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_pull_command() -> Vec<String> {
    vec!["docker".to_string(), "pull".to_string()]
}

fn default_pull_attempts() -> u32 {
    5
}

fn default_pull_retry_delay_ms() -> u64 {
    1000
}

/// One service of the bundle started before the suite
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service name (used in logs)
    pub name: String,
    /// Binary to run
    pub binary: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    /// `host:port` that accepts TCP connections once the service is up
    pub health_addr: Option<String>,
    /// How long to wait for the health address (seconds)
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,
}

impl ServiceConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }
}

fn default_startup_timeout_secs() -> u64 {
    60
}

/// etcd followed by an insecure API server, the bundle the node tests expect
fn default_services() -> Vec<ServiceConfig> {
    vec![
        ServiceConfig {
            name: "etcd".to_string(),
            binary: PathBuf::from("etcd"),
            args: vec![
                "--data-dir".to_string(),
                "/tmp/node-e2e-etcd".to_string(),
                "--listen-client-urls".to_string(),
                "http://127.0.0.1:2379".to_string(),
                "--advertise-client-urls".to_string(),
                "http://127.0.0.1:2379".to_string(),
            ],
            health_addr: Some("127.0.0.1:2379".to_string()),
            startup_timeout_secs: default_startup_timeout_secs(),
        },
        ServiceConfig {
            name: "kube-apiserver".to_string(),
            binary: PathBuf::from("kube-apiserver"),
            args: vec![
                "--etcd-servers".to_string(),
                "http://127.0.0.1:2379".to_string(),
                "--insecure-bind-address".to_string(),
                "0.0.0.0".to_string(),
                "--service-cluster-ip-range".to_string(),
                "10.0.0.1/24".to_string(),
                "--kubelet-port".to_string(),
                "10250".to_string(),
                "--allow-privileged".to_string(),
                "true".to_string(),
            ],
            health_addr: Some("127.0.0.1:8080".to_string()),
            startup_timeout_secs: default_startup_timeout_secs(),
        },
    ]
}

/// Node readiness polling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessConfig {
    /// Overall timeout (seconds)
    #[serde(default = "default_ready_timeout_secs")]
    pub timeout_secs: u64,
    /// Poll interval (milliseconds)
    #[serde(default = "default_ready_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_ready_timeout_secs(),
            poll_interval_ms: default_ready_poll_interval_ms(),
        }
    }
}

impl ReadinessConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_ready_timeout_secs() -> u64 {
    120
}

fn default_ready_poll_interval_ms() -> u64 {
    1000
}

/// External spec commands run after setup
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunnerConfig {
    #[serde(default)]
    pub specs: Vec<SpecCommand>,
}

/// A spec command and the name it is reported under
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpecCommand {
    pub name: String,
    /// Program followed by its arguments
    pub command: Vec<String>,
}

/// System validation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Cgroup subsystems that must be enabled
    #[serde(default = "default_cgroup_subsystems")]
    pub cgroup_subsystems: Vec<String>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            cgroup_subsystems: default_cgroup_subsystems(),
        }
    }
}

fn default_cgroup_subsystems() -> Vec<String> {
    ["cpu", "cpuacct", "cpuset", "devices", "freezer", "memory"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

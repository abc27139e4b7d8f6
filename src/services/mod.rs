//! Service bundle lifecycle
//!
//! The node tests need an API server backed by etcd. The test process does
//! not run them itself: [`E2EServices::start`] re-executes the harness
//! binary with `--run-services-mode`, and that child ([`run_services`])
//! starts every configured service in order and supervises it until it is
//! told to stop.
//!
//! Stopping is always SIGTERM first, then SIGKILL after a grace period.

pub mod process;

use crate::config::ServiceConfig;
use crate::exec::reexec_command;
use crate::mode::{MONITOR_PARENT_FLAG, RUN_SERVICES_FLAG};
use anyhow::{Context, Result};
use process::{terminate, wait_for_port};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Child, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{info, warn};

/// Grace period between SIGTERM and SIGKILL for one service
pub const SERVICE_STOP_GRACE: Duration = Duration::from_secs(5);

/// How often the supervisor checks its parent and its services
const SUPERVISE_INTERVAL: Duration = Duration::from_millis(500);

/// Name of the supervisor log inside the report directory
pub const SERVICES_LOG: &str = "services.log";

/// Handle on the services supervisor, held by the test process
pub struct E2EServices {
    monitor_parent: bool,
    health: Vec<(String, String, Duration)>,
    grace: Duration,
    child: Option<Child>,
    log_path: Option<PathBuf>,
}

impl E2EServices {
    /// `monitor_parent` makes the supervisor exit together with this process
    pub fn new(monitor_parent: bool, services: &[ServiceConfig]) -> Self {
        let health = services
            .iter()
            .filter_map(|s| {
                s.health_addr
                    .as_ref()
                    .map(|addr| (s.name.clone(), addr.clone(), s.startup_timeout()))
            })
            .collect();

        Self {
            monitor_parent,
            health,
            // The supervisor needs time to stop each of its services in turn
            grace: SERVICE_STOP_GRACE * (services.len() as u32 + 1),
            child: None,
            log_path: None,
        }
    }

    /// Launch the supervisor and wait until the bundle is healthy
    ///
    /// `args` are this process's arguments (without the program name); the
    /// supervisor parses the same configuration. Output goes to
    /// `<log_dir>/services.log` when `log_dir` is set.
    pub fn start(&mut self, exe: &Path, args: &[OsString], log_dir: Option<&Path>) -> Result<()> {
        if self.child.is_some() {
            anyhow::bail!("services are already started");
        }

        let mut flags = vec![RUN_SERVICES_FLAG];
        if self.monitor_parent {
            flags.push(MONITOR_PARENT_FLAG);
        }
        let mut cmd = reexec_command(exe, &flags, args).to_command();
        cmd.stdin(Stdio::null());

        if let Some(dir) = log_dir {
            let log_path = dir.join(SERVICES_LOG);
            let log_file = std::fs::File::create(&log_path)
                .with_context(|| format!("Failed to create service log file {}", log_path.display()))?;
            cmd.stdout(Stdio::from(log_file.try_clone()?));
            cmd.stderr(Stdio::from(log_file));
            info!("Service log: {}", log_path.display());
            self.log_path = Some(log_path);
        }

        let child = cmd
            .spawn()
            .with_context(|| format!("Failed to spawn services process {}", exe.display()))?;
        info!(pid = child.id(), "services process launched");
        self.child = Some(child);

        if let Err(e) = self.wait_healthy() {
            if let Err(stop_err) = self.stop() {
                warn!("Failed to clean up services after a failed start: {:#}", stop_err);
            }
            return Err(e);
        }

        info!("All services are up");
        Ok(())
    }

    fn wait_healthy(&mut self) -> Result<()> {
        for (name, addr, timeout) in &self.health {
            let child = match self.child.as_mut() {
                Some(child) => child,
                None => anyhow::bail!("services process is not running"),
            };
            wait_for_port(addr, *timeout, Some(child), None).with_context(|| {
                let log = self
                    .log_path
                    .as_ref()
                    .map(|p| format!(" (see {})", p.display()))
                    .unwrap_or_default();
                format!("service {} did not become healthy{}", name, log)
            })?;
        }
        Ok(())
    }

    /// Stop the supervisor, which stops the services in reverse order
    pub fn stop(&mut self) -> Result<()> {
        let mut child = match self.child.take() {
            Some(child) => child,
            None => return Ok(()),
        };

        info!(pid = child.id(), "stopping services");
        let status = terminate(&mut child, self.grace).context("Failed to stop services process")?;
        info!("Services process exited with {}", status);
        Ok(())
    }

    /// Whether the supervisor process is still alive
    pub fn is_running(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }
}

/// A started service
struct RunningService {
    name: String,
    child: Child,
}

/// Services started in order, stopped in reverse
pub struct Bundle {
    running: Vec<RunningService>,
    grace: Duration,
}

impl Bundle {
    /// Start every service and wait for its health address
    ///
    /// On failure, whatever was already started is stopped again. Setting
    /// `cancel` aborts the startup the same way.
    pub fn start(services: &[ServiceConfig], grace: Duration, cancel: Option<&AtomicBool>) -> Result<Self> {
        let mut bundle = Self {
            running: Vec::with_capacity(services.len()),
            grace,
        };

        for service in services {
            let result = if cancel.map_or(false, |c| c.load(Ordering::SeqCst)) {
                Err(anyhow::anyhow!("cancelled before starting {}", service.name))
            } else {
                bundle.start_one(service, cancel)
            };
            if let Err(e) = result {
                bundle.stop();
                return Err(e);
            }
        }

        Ok(bundle)
    }

    fn start_one(&mut self, service: &ServiceConfig, cancel: Option<&AtomicBool>) -> Result<()> {
        let mut child = std::process::Command::new(&service.binary)
            .args(&service.args)
            .stdin(Stdio::null())
            .spawn()
            .with_context(|| format!("Failed to start {} ({})", service.name, service.binary.display()))?;
        info!(service = %service.name, pid = child.id(), "service started");

        if let Some(ref addr) = service.health_addr {
            if let Err(e) = wait_for_port(addr, service.startup_timeout(), Some(&mut child), cancel) {
                // Not yet in `running`, stop it here
                if let Err(stop_err) = terminate(&mut child, self.grace) {
                    warn!(service = %service.name, "Failed to stop service: {:#}", stop_err);
                }
                return Err(e.context(format!("service {} did not become healthy", service.name)));
            }
            info!(service = %service.name, addr = %addr, "service is healthy");
        }

        self.running.push(RunningService {
            name: service.name.clone(),
            child,
        });
        Ok(())
    }

    /// First service that exited on its own, if any
    pub fn exited_service(&mut self) -> Option<String> {
        self.running.iter_mut().find_map(|svc| match svc.child.try_wait() {
            Ok(Some(status)) => Some(format!("{} exited with {}", svc.name, status)),
            _ => None,
        })
    }

    /// Stop all services in reverse start order; returns their names in
    /// stop order
    pub fn stop(&mut self) -> Vec<String> {
        let mut stopped = Vec::with_capacity(self.running.len());
        while let Some(mut svc) = self.running.pop() {
            match terminate(&mut svc.child, self.grace) {
                Ok(status) => info!(service = %svc.name, "service stopped ({})", status),
                Err(e) => warn!(service = %svc.name, "Failed to stop service: {:#}", e),
            }
            stopped.push(svc.name);
        }
        stopped
    }

    pub fn len(&self) -> usize {
        self.running.len()
    }

    pub fn is_empty(&self) -> bool {
        self.running.is_empty()
    }
}

/// Shutdown request raised by SIGTERM or SIGINT
#[derive(Debug, Default)]
pub struct Shutdown {
    requested: AtomicBool,
    reason: OnceLock<String>,
    notify: Notify,
}

impl Shutdown {
    /// Record the request; the first reason wins
    pub fn request(&self, reason: impl Into<String>) {
        let _ = self.reason.set(reason.into());
        self.requested.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Flag that blocking startup code polls
    pub fn flag(&self) -> &AtomicBool {
        &self.requested
    }

    pub fn reason(&self) -> String {
        self.reason
            .get()
            .cloned()
            .unwrap_or_else(|| "shutdown requested".to_string())
    }

    /// Resolve once a shutdown was requested
    pub async fn wait(&self) {
        while !self.is_requested() {
            self.notify.notified().await;
        }
    }
}

/// Route SIGTERM and SIGINT into `shutdown`
///
/// Once installed the signals no longer terminate the process.
pub fn install_signal_handlers(runtime: &tokio::runtime::Runtime, shutdown: Arc<Shutdown>) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let _guard = runtime.enter();
    let mut sigterm = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

    runtime.spawn(async move {
        let reason = tokio::select! {
            _ = sigterm.recv() => "received SIGTERM",
            _ = sigint.recv() => "received SIGINT",
        };
        shutdown.request(reason);
    });
    Ok(())
}

/// Services supervisor: the body of `--run-services-mode`
///
/// Blocks until SIGINT, SIGTERM, a service exiting, or (with
/// `monitor_parent`) the parent process going away. A signal during startup
/// stops the services started so far.
pub fn run_services(services: &[ServiceConfig], monitor_parent: bool) -> Result<()> {
    info!(count = services.len(), monitor_parent, "starting service bundle");
    let parent = unsafe { libc::getppid() };

    let runtime = tokio::runtime::Runtime::new().context("Failed to create tokio runtime")?;
    let shutdown = Arc::new(Shutdown::default());
    // Installed before the first service is spawned
    install_signal_handlers(&runtime, Arc::clone(&shutdown))?;

    let mut bundle = match Bundle::start(services, SERVICE_STOP_GRACE, Some(shutdown.flag())) {
        Ok(bundle) => bundle,
        Err(_) if shutdown.is_requested() => {
            info!("Service bundle startup interrupted: {}", shutdown.reason());
            return Ok(());
        }
        Err(e) => return Err(e),
    };
    info!("Service bundle is up");

    let reason = runtime.block_on(wait_for_shutdown(&mut bundle, &shutdown, monitor_parent.then_some(parent)));

    info!("Stopping service bundle: {}", reason);
    let stopped = bundle.stop();
    info!(services = ?stopped, "service bundle stopped");
    Ok(())
}

async fn wait_for_shutdown(bundle: &mut Bundle, shutdown: &Shutdown, parent: Option<libc::pid_t>) -> String {
    let mut ticker = tokio::time::interval(SUPERVISE_INTERVAL);

    loop {
        tokio::select! {
            _ = shutdown.wait() => return shutdown.reason(),
            _ = ticker.tick() => {
                if let Some(parent) = parent {
                    // Orphans are re-parented, so a changed ppid means the parent died
                    if unsafe { libc::getppid() } != parent {
                        return format!("parent process {} exited", parent);
                    }
                }
                if let Some(exited) = bundle.exited_service() {
                    warn!("{}", exited);
                    return exited;
                }
            }
        }
    }
}

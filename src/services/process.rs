//! Process helpers for long-running children

use anyhow::{Context, Result};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::process::{Child, ExitStatus};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

const PORT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Wait until `addr` accepts TCP connections
///
/// When `child` is given and exits first, fails right away instead of
/// waiting out the timeout. Setting `cancel` also ends the wait with an
/// error.
pub fn wait_for_port(
    addr: &str,
    timeout: Duration,
    mut child: Option<&mut Child>,
    cancel: Option<&AtomicBool>,
) -> Result<()> {
    let addrs: Vec<SocketAddr> = addr
        .to_socket_addrs()
        .with_context(|| format!("Invalid health address: {}", addr))?
        .collect();
    if addrs.is_empty() {
        anyhow::bail!("Health address {} did not resolve", addr);
    }

    let deadline = Instant::now() + timeout;
    loop {
        if addrs
            .iter()
            .any(|a| TcpStream::connect_timeout(a, CONNECT_TIMEOUT).is_ok())
        {
            debug!(addr, "port is accepting connections");
            return Ok(());
        }

        if let Some(child) = child.as_deref_mut() {
            if let Some(status) = child.try_wait()? {
                anyhow::bail!("process exited with {} before {} was reachable", status, addr);
            }
        }

        if cancel.map_or(false, |c| c.load(Ordering::SeqCst)) {
            anyhow::bail!("cancelled while waiting for {}", addr);
        }

        if Instant::now() >= deadline {
            anyhow::bail!("{} not reachable after {:?}", addr, timeout);
        }
        std::thread::sleep(PORT_POLL_INTERVAL);
    }
}

/// Stop a child: SIGTERM, then SIGKILL once `grace` has passed
pub fn terminate(child: &mut Child, grace: Duration) -> Result<ExitStatus> {
    if let Some(status) = child.try_wait()? {
        debug!(pid = child.id(), "process already exited with {}", status);
        return Ok(status);
    }

    let rc = unsafe { libc::kill(child.id() as libc::pid_t, libc::SIGTERM) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        // Exited between try_wait and kill
        if err.raw_os_error() != Some(libc::ESRCH) {
            return Err(err).with_context(|| format!("Failed to send SIGTERM to {}", child.id()));
        }
    }

    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }
        std::thread::sleep(EXIT_POLL_INTERVAL);
    }

    debug!(pid = child.id(), "still running after {:?}, force killing", grace);
    child.kill()?;
    Ok(child.wait()?)
}

//! Image pre-pulling
//!
//! Pulling the images the tests depend on up front makes an image pull
//! problem fail the run immediately instead of surfacing as a flaky test.

use crate::config::ImageConfig;
use crate::error::HarnessError;
use crate::exec::{CommandRunner, CommandSpec};
use anyhow::Result;
use std::time::Duration;
use tracing::{info, warn};

/// Pulls images through the configured pull command
pub struct ImagePuller<'a> {
    runner: &'a dyn CommandRunner,
    pull_command: &'a [String],
    max_attempts: u32,
    retry_delay: Duration,
}

impl<'a> ImagePuller<'a> {
    pub fn new(runner: &'a dyn CommandRunner, config: &'a ImageConfig) -> Self {
        Self {
            runner,
            pull_command: &config.pull_command,
            max_attempts: config.max_attempts.max(1),
            retry_delay: config.retry_delay(),
        }
    }

    /// Pull every image, stopping at the first one that cannot be pulled
    pub fn prepull_all(&self, images: &[String]) -> Result<()> {
        for image in images {
            let start = std::time::Instant::now();
            self.pull(image)?;
            info!(image = %image, elapsed = ?start.elapsed(), "pre-pulled image");
        }
        Ok(())
    }

    /// Pull one image, retrying up to the attempt limit
    pub fn pull(&self, image: &str) -> Result<()> {
        let (program, base_args) = match self.pull_command.split_first() {
            Some(split) => split,
            None => anyhow::bail!("image pull command is empty"),
        };
        let cmd = CommandSpec::new(program).args(base_args).arg(image);

        let mut last_error = None;
        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                std::thread::sleep(self.retry_delay);
            }

            match self.runner.run(&cmd) {
                Ok(out) if out.success() => return Ok(()),
                Ok(out) => {
                    warn!(
                        image,
                        attempt,
                        output = %out.output_lossy().trim(),
                        "image pull failed"
                    );
                    last_error = Some(anyhow::Error::new(HarnessError::CommandFailed {
                        command: cmd.to_string(),
                        status: out.status_string(),
                    }));
                }
                Err(e) => {
                    warn!(image, attempt, "image pull could not start: {:#}", e);
                    last_error = Some(e);
                }
            }
        }

        let err = last_error.unwrap_or_else(|| anyhow::anyhow!("no pull attempts were made"));
        Err(err.context(format!(
            "failed to pull image {} after {} attempts",
            image, self.max_attempts
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::mock::MockRunner;

    fn config(attempts: u32) -> ImageConfig {
        ImageConfig {
            list: vec!["busybox:1.36".to_string(), "nginx:1.25".to_string()],
            pull_command: vec!["crictl".to_string(), "pull".to_string()],
            max_attempts: attempts,
            retry_delay_ms: 1,
        }
    }

    #[test]
    fn test_prepull_all_success() {
        let runner = MockRunner::new();
        let config = config(5);
        let puller = ImagePuller::new(&runner, &config);

        puller.prepull_all(&config.list).unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].to_string(), "crictl pull busybox:1.36");
        assert_eq!(calls[1].to_string(), "crictl pull nginx:1.25");
    }

    #[test]
    fn test_pull_retries_then_succeeds() {
        let runner = MockRunner::new();
        runner.push_exit(1, "i/o timeout");
        runner.push_launch_error("resource temporarily unavailable");
        runner.push_success("");
        let config = config(5);

        ImagePuller::new(&runner, &config).pull("busybox:1.36").unwrap();
        assert_eq!(runner.call_count(), 3);
    }

    #[test]
    fn test_pull_gives_up_after_max_attempts() {
        let runner = MockRunner::new();
        for _ in 0..3 {
            runner.push_exit(1, "manifest unknown");
        }
        let config = config(3);

        let err = ImagePuller::new(&runner, &config).prepull_all(&config.list).unwrap_err();
        assert_eq!(runner.call_count(), 3, "second image must not be attempted");
        assert!(format!("{:#}", err).contains("failed to pull image busybox:1.36 after 3 attempts"));
    }
}

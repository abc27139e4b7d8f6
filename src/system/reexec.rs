//! System validation in a child process
//!
//! The test binary re-executes itself with `--system-validate-mode` and the
//! same flags it was given, so the child sees exactly the parent's
//! configuration. The child's combined output is already formatted and is
//! printed verbatim.

use crate::error::HarnessError;
use crate::exec::{reexec_command, CommandRunner};
use crate::mode::SYSTEM_VALIDATE_FLAG;
use anyhow::{Context, Result};
use std::ffi::OsString;
use std::path::Path;

/// Run system validation in a separate process and fail if it fails
///
/// `args` is the parent's argument list without the program name.
pub fn validate_system(runner: &dyn CommandRunner, test_bin: &Path, args: &[OsString]) -> Result<()> {
    let cmd = reexec_command(test_bin, &[SYSTEM_VALIDATE_FLAG], args);

    let out = runner
        .run(&cmd)
        .with_context(|| format!("system validation failed: can't run {}", test_bin.display()))?;

    print!("{}", out.output_lossy());

    if !out.success() {
        return Err(HarnessError::ValidationFailed(out.status_string()).into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::mock::MockRunner;

    fn args(list: &[&str]) -> Vec<OsString> {
        list.iter().map(OsString::from).collect()
    }

    #[test]
    fn test_child_gets_parent_flags_plus_mode() {
        let runner = MockRunner::new();
        runner.push_success("OS: Linux\n");
        let parent = args(&["--node-name", "n1", "--report-dir", "/tmp/r", "--", "--focus", "x"]);

        validate_system(&runner, Path::new("/usr/local/bin/e2e_node"), &parent).unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].program, Path::new("/usr/local/bin/e2e_node"));

        let mut expected = args(&[SYSTEM_VALIDATE_FLAG]);
        expected.extend(parent.iter().cloned());
        assert_eq!(calls[0].args, expected);
    }

    #[test]
    fn test_nonzero_exit_is_validation_failure() {
        let runner = MockRunner::new();
        runner.push_exit(1, "KERNEL_VERSION: 2.6.32 (FAIL)\n");

        let err = validate_system(&runner, Path::new("/bin/e2e"), &[]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<HarnessError>(),
            Some(HarnessError::ValidationFailed(status)) if status == "exit status 1"
        ));
    }

    #[test]
    fn test_launch_failure_is_propagated() {
        let runner = MockRunner::new();
        runner.push_launch_error("No such file or directory");

        let err = validate_system(&runner, Path::new("/bin/e2e"), &[]).unwrap_err();
        let msg = format!("{:#}", err);
        assert!(msg.contains("can't run /bin/e2e"));
        assert!(msg.contains("No such file or directory"));
    }
}

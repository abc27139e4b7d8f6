//! Mock command runner for testing
//!
//! Records every command it is asked to run and answers from a scripted
//! queue of responses. When the queue is empty every command succeeds with
//! empty output.
//!
//! # Example
//!
//! ```
//! use node_e2e::exec::{CommandRunner, CommandSpec, ExecOutput};
//! use node_e2e::exec::mock::MockRunner;
//!
//! let runner = MockRunner::new();
//! runner.push_output(ExecOutput { code: Some(1), output: b"boom".to_vec() });
//!
//! let out = runner.run(&CommandSpec::new("docker").arg("pull")).unwrap();
//! assert!(!out.success());
//! assert_eq!(runner.call_count(), 1);
//! ```

use super::{CommandRunner, CommandSpec, ExecOutput};
use anyhow::Result;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
enum Response {
    Output(ExecOutput),
    LaunchError(String),
}

/// Scripted [`CommandRunner`]
#[derive(Debug, Clone, Default)]
pub struct MockRunner {
    /// Commands seen so far, in order
    calls: Arc<Mutex<Vec<CommandSpec>>>,

    /// Responses handed out in order
    responses: Arc<Mutex<VecDeque<Response>>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the result of the next command
    pub fn push_output(&self, output: ExecOutput) {
        self.responses.lock().unwrap().push_back(Response::Output(output));
    }

    /// Queue a successful run with the given output
    pub fn push_success(&self, output: &str) {
        self.push_output(ExecOutput {
            code: Some(0),
            output: output.as_bytes().to_vec(),
        });
    }

    /// Queue a run exiting with `code`
    pub fn push_exit(&self, code: i32, output: &str) {
        self.push_output(ExecOutput {
            code: Some(code),
            output: output.as_bytes().to_vec(),
        });
    }

    /// Queue a failure to launch the next command
    pub fn push_launch_error(&self, message: &str) {
        self.responses
            .lock()
            .unwrap()
            .push_back(Response::LaunchError(message.to_string()));
    }

    /// All recorded commands
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Number of recorded commands whose program ends with `name`
    pub fn count_program(&self, name: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.program.ends_with(name))
            .count()
    }
}

impl CommandRunner for MockRunner {
    fn run(&self, spec: &CommandSpec) -> Result<ExecOutput> {
        self.calls.lock().unwrap().push(spec.clone());

        match self.responses.lock().unwrap().pop_front() {
            Some(Response::Output(output)) => Ok(output),
            Some(Response::LaunchError(message)) => anyhow::bail!(message),
            None => Ok(ExecOutput {
                code: Some(0),
                output: Vec::new(),
            }),
        }
    }
}

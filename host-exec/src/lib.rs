// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Command execution shared by the updater's local and remote paths.
//!
//! Everything that runs a child process goes through the [`Executor`]
//! trait: production code uses [`HostExecutor`], while tests script the
//! expected command sequence against the executor in [`fake`].

use async_trait::async_trait;
use itertools::Itertools;
use slog::{debug, trace, Logger};
use std::process::{ExitStatus, Output};
use std::str::from_utf8;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub mod fake;

/// Describes the commonly-used "safe-to-reference" type describing the
/// Executor as a trait object.
pub type BoxedExecutor = Arc<dyn Executor>;

#[derive(Debug)]
pub struct CommandFailureInfo {
    pub command: String,
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl std::fmt::Display for CommandFailureInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(
            f,
            "Command [{}] executed and failed with status: {}",
            self.command, self.status
        )?;
        write!(f, "  stdout: {}", self.stdout)?;
        write!(f, "  stderr: {}", self.stderr)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ExecutionError {
    #[error("Failed to start execution of [{command}]: {err}")]
    ExecutionStart { command: String, err: std::io::Error },

    #[error("{0}")]
    CommandFailure(Box<CommandFailureInfo>),
}

/// The input of a command: program and arguments.
///
/// Comparable and displayable, so expectations in tests can be matched
/// against the commands a component actually issued.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Input {
    pub program: String,
    pub args: Vec<String>,
}

impl Input {
    pub fn new<S: Into<String>>(program: S, args: Vec<S>) -> Self {
        Self {
            program: program.into(),
            args: args.into_iter().map(|s| s.into()).collect(),
        }
    }

    /// Convenience constructor splitting a flat string on whitespace.
    pub fn shell<S: AsRef<str>>(input: S) -> Self {
        let mut words = input.as_ref().split_whitespace();
        let program = words.next().expect("empty input").to_string();
        Self { program, args: words.map(|s| s.to_string()).collect() }
    }
}

impl std::fmt::Display for Input {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        if !self.args.is_empty() {
            write!(f, " {}", self.args.iter().join(" "))?;
        }
        Ok(())
    }
}

impl From<&std::process::Command> for Input {
    fn from(command: &std::process::Command) -> Self {
        Self {
            program: command.get_program().to_string_lossy().to_string(),
            args: command
                .get_args()
                .map(|s| s.to_string_lossy().to_string())
                .collect(),
        }
    }
}

pub fn command_to_string(command: &std::process::Command) -> String {
    Input::from(command).to_string()
}

/// Convenience functions for constructing [`Output`]s, mostly on behalf of
/// fake executors.
pub trait OutputExt: Sized {
    fn success() -> Self;
    fn failure() -> Self;
    fn exit_status(code: i32) -> ExitStatus;
    fn set_stdout<S: AsRef<str>>(self, stdout: S) -> Self;
    fn set_stderr<S: AsRef<str>>(self, stderr: S) -> Self;
}

impl OutputExt for Output {
    fn success() -> Self {
        Output {
            status: <Output as OutputExt>::exit_status(0),
            stdout: vec![],
            stderr: vec![],
        }
    }

    fn failure() -> Self {
        Output {
            status: <Output as OutputExt>::exit_status(1),
            stdout: vec![],
            stderr: vec![],
        }
    }

    fn exit_status(code: i32) -> ExitStatus {
        #[cfg(unix)]
        use std::os::unix::process::ExitStatusExt;
        ExitStatus::from_raw(code << 8)
    }

    fn set_stdout<S: AsRef<str>>(mut self, stdout: S) -> Self {
        self.stdout = stdout.as_ref().as_bytes().to_vec();
        self
    }

    fn set_stderr<S: AsRef<str>>(mut self, stderr: S) -> Self {
        self.stderr = stderr.as_ref().as_bytes().to_vec();
        self
    }
}

pub fn output_to_exec_error(
    command: String,
    output: &Output,
) -> ExecutionError {
    ExecutionError::CommandFailure(Box::new(CommandFailureInfo {
        command,
        status: output.status,
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    }))
}

fn log_input(log: &Logger, id: u64, command: &std::process::Command) {
    debug!(
        log,
        "running command via executor";
        "id" => id,
        "command" => %Input::from(command),
    );
}

fn log_output(log: &Logger, id: u64, output: &Output) {
    debug!(
        log,
        "finished running command via executor";
        "id" => id,
        "result" => if output.status.success() { "OK" } else { "ERROR" },
        "status" => output
            .status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "none".to_string()),
    );
    if !output.stdout.is_empty() {
        trace!(
            log,
            "finished command stdout";
            "id" => id,
            "stdout" => from_utf8(&output.stdout).unwrap_or("<Not valid UTF-8>"),
        );
    }
    if !output.stderr.is_empty() {
        trace!(
            log,
            "finished command stderr";
            "id" => id,
            "stderr" => from_utf8(&output.stderr).unwrap_or("<Not valid UTF-8>"),
        );
    }
}

/// Describes an "executor", which can run commands and return a response.
///
/// - In production, this is usually simply a [HostExecutor].
/// - Under test, a [fake::FakeExecutor] may be used.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Executes a command, waiting for it to complete, and returning output.
    ///
    /// A non-zero exit status is an [`ExecutionError::CommandFailure`].
    async fn execute(
        &self,
        command: &mut tokio::process::Command,
    ) -> Result<Output, ExecutionError>;
}

/// Executor which launches real child processes on the host.
pub struct HostExecutor {
    log: Logger,
    counter: AtomicU64,
}

impl HostExecutor {
    pub fn new(log: Logger) -> Arc<Self> {
        Arc::new(Self { log, counter: AtomicU64::new(0) })
    }

    /// Perform some type coercion to access a commonly-used trait object.
    pub fn as_executor(self: Arc<Self>) -> BoxedExecutor {
        self
    }

    fn prepare(&self, command: &std::process::Command) -> u64 {
        let id = self.counter.fetch_add(1, Ordering::SeqCst);
        log_input(&self.log, id, command);
        id
    }

    fn finalize(
        &self,
        command: &std::process::Command,
        id: u64,
        output: Output,
    ) -> Result<Output, ExecutionError> {
        log_output(&self.log, id, &output);
        if !output.status.success() {
            return Err(output_to_exec_error(
                command_to_string(command),
                &output,
            ));
        }
        Ok(output)
    }
}

#[async_trait]
impl Executor for HostExecutor {
    async fn execute(
        &self,
        command: &mut tokio::process::Command,
    ) -> Result<Output, ExecutionError> {
        let id = self.prepare(command.as_std());
        let output = command.output().await.map_err(|err| {
            ExecutionError::ExecutionStart {
                command: command_to_string(command.as_std()),
                err,
            }
        })?;
        self.finalize(command.as_std(), id, output)
    }
}

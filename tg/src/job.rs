//! Job files: shell commands run through a task group
//!
//! A job file is YAML with optional `group` options and a list of `tasks`.
//! Each task is a shell command run with `sh -c`; its `args` become the
//! positional parameters `$1..` and its name becomes `$0`. A task's value is
//! its stdout.

use std::path::Path;
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::GroupError;
use crate::group::{GroupOptions, GroupOverrides, TaskGroup};
use crate::limiter::Admission;
use crate::value::{Args, CallError, Callable, Function, Thread, Value};

/// A parsed job file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobFile {
    /// Group options; unset fields fall back to the config file
    pub group: GroupOverrides,

    /// Commands to run, in result order
    pub tasks: Vec<TaskSpec>,
}

/// One command in a job file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    /// Display name; defaults to `task-<index>`
    #[serde(default)]
    pub name: Option<String>,

    /// Shell command passed to `sh -c`
    pub command: String,

    /// Positional parameters for the command
    #[serde(default)]
    pub args: Vec<String>,

    /// Kill the command if it runs longer than this
    #[serde(default, rename = "timeout-ms")]
    pub timeout_ms: Option<u64>,
}

impl TaskSpec {
    /// Name shown in output and error messages
    pub fn label(&self, index: usize) -> String {
        self.name.clone().unwrap_or_else(|| format!("task-{}", index))
    }

    /// The callable that runs this command
    pub fn function(&self, index: usize) -> Function {
        Function::new(ShellCommand {
            name: self.label(index),
            command: self.command.clone(),
            timeout: self.timeout_ms.map(Duration::from_millis),
        })
    }

    fn args(&self) -> Args {
        self.args.iter().map(|arg| Value::from(arg.as_str())).collect::<Vec<_>>().into()
    }
}

impl JobFile {
    /// Load and validate a job file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        debug!(path = %path.as_ref().display(), "JobFile::load: called");
        let content = std::fs::read_to_string(&path).context("Failed to read job file")?;
        let job = Self::from_yaml(&content)?;
        info!("Loaded job with {} tasks from: {}", job.tasks.len(), path.as_ref().display());
        Ok(job)
    }

    /// Parse and validate a job from YAML text
    pub fn from_yaml(content: &str) -> Result<Self> {
        let job: Self = serde_yaml::from_str(content).context("Failed to parse job file")?;
        job.validate()?;
        Ok(job)
    }

    /// Check every task has a command
    pub fn validate(&self) -> Result<()> {
        for (index, task) in self.tasks.iter().enumerate() {
            if task.command.trim().is_empty() {
                return Err(eyre::eyre!("Task {} has an empty command", task.label(index)));
            }
            if task.timeout_ms == Some(0) {
                return Err(eyre::eyre!("Task {} has a zero timeout-ms", task.label(index)));
            }
        }
        Ok(())
    }

    /// Group options for this job: `base`, then the job's own, then `cli`
    pub fn options(&self, base: &GroupOptions, cli: &GroupOverrides) -> GroupOptions {
        base.clone().merge(&self.group).merge(cli)
    }

    /// Register every task on `group`, in file order
    pub fn register<L: Admission>(&self, group: &mut TaskGroup<L>) -> Result<(), GroupError> {
        for (index, task) in self.tasks.iter().enumerate() {
            group.go(task.function(index), task.args())?;
        }
        Ok(())
    }

    /// Run the job under `ctx` with `options`, returning each task's output in file order
    pub async fn run(&self, ctx: &CancellationToken, options: &GroupOptions) -> Result<Vec<TaskOutput>, GroupError> {
        debug!(tasks = self.tasks.len(), ?options, "JobFile::run: called");
        let mut group = TaskGroup::new(ctx, options)?;
        self.register(&mut group)?;
        let values = group.wait().await?;

        Ok(self
            .tasks
            .iter()
            .enumerate()
            .zip(values)
            .map(|((index, task), value)| TaskOutput {
                name: task.label(index),
                output: value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string()),
            })
            .collect())
    }
}

/// Output of one finished task
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskOutput {
    pub name: String,
    pub output: String,
}

/// Runs a shell command; cancelling the calling thread kills it
struct ShellCommand {
    name: String,
    command: String,
    timeout: Option<Duration>,
}

impl ShellCommand {
    async fn output(&self, mut cmd: Command) -> Result<Output, CallError> {
        let spawned = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, cmd.output()).await.map_err(|_| {
                debug!(name = %self.name, ?limit, "ShellCommand::output: timed out");
                CallError::failed(&self.name, format!("timed out after {}ms", limit.as_millis()))
            })?,
            None => cmd.output().await,
        };
        spawned.map_err(|e| CallError::failed(&self.name, format!("failed to execute command: {}", e)))
    }
}

#[async_trait]
impl Callable for ShellCommand {
    fn name(&self) -> &str {
        &self.name
    }

    async fn call(&self, thread: &Thread, args: &Args) -> Result<Value, CallError> {
        debug!(name = %self.name, command = %self.command, "ShellCommand::call: called");
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&self.command).arg(&self.name);
        for arg in args.positional() {
            cmd.arg(arg.as_str().map(str::to_string).unwrap_or_else(|| arg.to_string()));
        }
        cmd.stdin(Stdio::null()).kill_on_drop(true);

        let output = tokio::select! {
            biased;
            _ = thread.context().cancelled() => {
                debug!(name = %self.name, "ShellCommand::call: cancelled, killing command");
                return Err(CallError::cancelled(&self.name));
            }
            output = self.output(cmd) => output?,
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!(exit_code = ?output.status.code(), "ShellCommand::call: command failed");
            return Err(CallError::failed(
                &self.name,
                format!("exit code {}: {}", output.status.code().unwrap_or(-1), stderr.trim_end()),
            ));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        debug!(stdout_len = stdout.len(), "ShellCommand::call: command succeeded");
        Ok(Value::from(stdout.trim_end_matches('\n')))
    }
}

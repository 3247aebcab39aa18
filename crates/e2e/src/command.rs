//! One-shot external commands (session minting, user creation, app server)

use std::fmt;
use std::process::{Output, Stdio};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;

/// A program plus its fixed arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Parse a whitespace-separated command line. Quoting is not supported.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        let program = parts.next()?;
        Some(Self::new(program, parts))
    }

    pub(crate) fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Why a one-shot command produced no output
#[derive(Debug)]
pub(crate) enum CommandFailure {
    Spawn(std::io::Error),
    TimedOut(Duration),
    Wait(std::io::Error),
}

impl fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandFailure::Spawn(e) => write!(f, "failed to spawn: {}", e),
            CommandFailure::TimedOut(d) => write!(f, "timed out after {:?}", d),
            CommandFailure::Wait(e) => write!(f, "failed to collect output: {}", e),
        }
    }
}

/// Run a command to completion, killing it if it outlives `limit`
pub(crate) async fn run_one_shot(
    spec: &CommandSpec,
    extra_args: &[String],
    limit: Duration,
) -> Result<Output, CommandFailure> {
    debug!("Running one-shot command: {} ({} extra args)", spec, extra_args.len());

    let mut cmd = spec.to_command();
    cmd.args(extra_args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn().map_err(CommandFailure::Spawn)?;

    match tokio::time::timeout(limit, child.wait_with_output()).await {
        Ok(result) => result.map_err(CommandFailure::Wait),
        Err(_) => Err(CommandFailure::TimedOut(limit)),
    }
}

/// Render captured output for error messages
pub(crate) fn describe_output(output: &Output) -> String {
    format!(
        "status: {}\nstdout: {}\nstderr: {}",
        output.status,
        String::from_utf8_lossy(&output.stdout).trim(),
        String::from_utf8_lossy(&output.stderr).trim()
    )
}

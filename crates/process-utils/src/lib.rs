//! Small process-related helpers.
//!
//! [`run_status`] runs a command for its side effects only: stdio is
//! discarded and only the exit status is reported. A failure to launch the
//! program is kept apart from failures after launch so callers can treat the
//! two differently.

use std::ffi::OsStr;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use thiserror::Error;

/// How a command run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The process exited on its own.
    Exited(ExitStatus),
    /// The process outlived the timeout and was killed.
    TimedOut,
}

impl RunOutcome {
    pub fn success(&self) -> bool {
        matches!(self, RunOutcome::Exited(status) if status.success())
    }
}

/// Errors from [`run_status`].
#[derive(Debug, Error)]
pub enum RunError {
    /// The program could not be started at all.
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The program started but waiting on it failed.
    #[error("failed to wait for {program}: {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl RunError {
    pub fn is_spawn(&self) -> bool {
        matches!(self, RunError::Spawn { .. })
    }
}

/// Create a `tokio::process::Command` with null stdio that is killed if its
/// handle is dropped.
pub fn quiet_command<I, S>(program: impl AsRef<OsStr>, args: I) -> tokio::process::Command
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut cmd = tokio::process::Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true);
    cmd
}

/// Run `program args...` and wait at most `timeout` for it to exit.
pub async fn run_status<I, S>(
    program: impl AsRef<OsStr>,
    args: I,
    timeout: Duration,
) -> Result<RunOutcome, RunError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let name = program.as_ref().to_string_lossy().into_owned();
    let mut child = quiet_command(program, args)
        .spawn()
        .map_err(|source| RunError::Spawn {
            program: name.clone(),
            source,
        })?;

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => Ok(RunOutcome::Exited(status)),
        Ok(Err(source)) => Err(RunError::Wait {
            program: name,
            source,
        }),
        Err(_) => {
            // The child may exit between the timeout and the kill.
            let _ = child.kill().await;
            Ok(RunOutcome::TimedOut)
        }
    }
}

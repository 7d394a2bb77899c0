//! Live-status store (`LastState.plist`).
//!
//! The file is written by `serveradmin fullstatus caching` and only exists
//! while the Caching Server is running, so reading it means running the
//! status command first.

use std::path::{Path, PathBuf};
use std::time::Duration;

use process_utils::RunOutcome;
use serde::Deserialize;
use tracing::{debug, warn};

use super::decode_plist;
use crate::error::{Error, Result};

/// Default location of the live-status store.
pub const LAST_STATE_PLIST_PATH: &str = "/Library/Server/Caching/Logs/LastState.plist";

/// Server admin utility that refreshes the live-status store.
pub const SERVERADMIN_PATH: &str =
    "/Applications/Server.app/Contents/ServerRoot/usr/sbin/serveradmin";

/// Arguments that make `serveradmin` refresh the caching status.
pub const STATUS_ARGS: [&str; 2] = ["fullstatus", "caching"];

/// Default upper bound on one status command run.
pub const DEFAULT_STATUS_TIMEOUT: Duration = Duration::from_secs(60);

/// Fields of `LastState.plist`. The default value is the inactive state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct LiveState {
    pub active: bool,
    pub peers: Vec<String>,
    pub cache_free: i64,
    pub cache_limit: i64,
    pub cache_used: i64,
    pub cache_status: String,
    pub startup_status: String,
    #[serde(rename = "state")]
    pub state: String,
    pub registration_status: i64,
    pub total_bytes_from_origin: i64,
    pub total_bytes_from_peers: i64,
    pub total_bytes_requested: i64,
    pub total_bytes_returned: i64,
}

/// The command that refreshes the live-status store.
#[derive(Debug, Clone)]
pub struct StatusCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub timeout: Duration,
}

impl StatusCommand {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: DEFAULT_STATUS_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for StatusCommand {
    fn default() -> Self {
        Self::new(
            SERVERADMIN_PATH,
            STATUS_ARGS.iter().map(|arg| arg.to_string()).collect(),
        )
    }
}

/// Refreshes and reads [`LiveState`].
#[derive(Debug, Clone)]
pub struct LiveStateSource {
    path: PathBuf,
    command: StatusCommand,
}

impl LiveStateSource {
    pub fn new(path: impl Into<PathBuf>, command: StatusCommand) -> Self {
        Self {
            path: path.into(),
            command,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run the status command, then read the live-status store.
    ///
    /// A command that exits non-zero or times out, and a store that does not
    /// exist, both resolve to the inactive [`LiveState::default`]. Failing to
    /// launch the command is an error ([`Error::is_fatal`]).
    pub async fn refresh(&self) -> Result<LiveState> {
        let outcome = process_utils::run_status(
            &self.command.program,
            &self.command.args,
            self.command.timeout,
        )
        .await?;

        match outcome {
            RunOutcome::Exited(status) if status.success() => {}
            RunOutcome::Exited(status) => {
                debug!(%status, "Status command exited unsuccessfully; caching service inactive");
                return Ok(LiveState::default());
            }
            RunOutcome::TimedOut => {
                warn!(
                    program = %self.command.program.display(),
                    timeout_secs = self.command.timeout.as_secs(),
                    "Status command timed out; caching service treated as inactive"
                );
                return Ok(LiveState::default());
            }
        }

        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Live-status store absent; caching service inactive");
                return Ok(LiveState::default());
            }
            Err(source) => {
                return Err(Error::SourceRead {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        decode_plist(&self.path, &bytes)
    }
}

impl Default for LiveStateSource {
    fn default() -> Self {
        Self::new(LAST_STATE_PLIST_PATH, StatusCommand::default())
    }
}

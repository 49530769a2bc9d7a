//! Error type shared by every supervisor component.

use std::io;
use std::path::PathBuf;

use nix::errno::Errno;
use thiserror::Error;

/// Errors raised by the supervisor library.
///
/// Contention on the singleton guard is not an error: it is reported through
/// [`crate::RunOutcome::AlreadyRunning`]. Malformed approval files are not
/// errors either; they read as "no valid approval record".
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Updates are disabled in the device configuration.
    #[error("updater is configured to be disabled")]
    Disabled,

    /// `approve`/`deny` was given a hash that is not the current plan's.
    #[error("invalid approval token: current plan is {current}, got {given}")]
    ApprovalMismatch { current: String, given: String },

    /// A lock operation was attempted on a handle that does not hold the lock.
    #[error("pid lock is not held by this handle")]
    LockNotHeld,

    /// The lock file kept being replaced under us.
    #[error("{path} was replaced {attempts} times while locking it")]
    LockChurn { path: PathBuf, attempts: u32 },

    /// Signal delivery failed for a reason other than a missing process.
    #[error("failed to signal process {pid}: {errno}")]
    Signal { pid: i32, errno: Errno },

    /// `EngineRunner::start` was called twice.
    #[error("update engine was already started by this runner")]
    AlreadyStarted,

    /// `EngineRunner::join` was called before `start`.
    #[error("update engine was not started")]
    NotStarted,

    /// The update engine (or a hook command) could not be spawned.
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    /// Hook commands must fit on a single line.
    #[error("hook command has to be a single line: {0:?}")]
    InvalidHookCommand(String),

    /// Unknown package list name.
    #[error("can't enable unknown package list: {0}")]
    NoSuchList(String),

    /// Unsupported language code.
    #[error("can't enable unsupported language code: {0}")]
    NoSuchLanguage(String),

    /// The device configuration store rejected a request.
    #[error("config store: {0}")]
    ConfigStore(String),

    /// Supervisor configuration file or environment is invalid.
    #[error("config error: {0}")]
    Config(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SupervisorError {
    /// Wrap an I/O error with the operation and path it came from.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, SupervisorError>;

/// Attach context to `io::Result` values.
pub(crate) trait IoContext<T> {
    fn io_context<F, S>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn io_context<F, S>(self, context: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|source| SupervisorError::io(context(), source))
    }
}

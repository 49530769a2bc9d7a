//! Supervisor configuration.
//!
//! Settings come from three layers, later ones winning:
//! - built-in defaults matching the device layout
//! - an optional TOML file (`SVUPD_CONFIG` or [`DEFAULT_CONFIG_PATH`])
//! - `SVUPD_*` environment overrides
//!
//! Device-level switches (autorun, approvals, package lists) are not kept
//! here; they live in the device configuration store, see [`crate::store`].

pub mod env;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, SupervisorError};

pub use env::{EnvError, EnvParser};

/// Where the configuration file is looked up when `SVUPD_CONFIG` is unset.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/updater-supervisor/config.toml";

/// Complete supervisor configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub paths: PathsConfig,
    pub engine: EngineConfig,
    pub notify: NotifyConfig,
    pub network: NetworkConfig,
    pub run: RunConfig,
    pub store: StoreConfig,
}

/// Files shared with the update engine and other tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub lock_file: PathBuf,
    pub hook_file: PathBuf,
    pub approvals_ask: PathBuf,
    pub approvals_stat: PathBuf,
    pub change_log: PathBuf,
    pub error_log: PathBuf,
    pub crash_log: PathBuf,
    pub opkg_lock: PathBuf,
    pub userlists: PathBuf,
    pub l10n: PathBuf,
    pub log_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            lock_file: PathBuf::from("/tmp/updater-supervisor.pid"),
            hook_file: PathBuf::from("/tmp/updater-postrun-hook"),
            approvals_ask: PathBuf::from("/usr/share/updater/need_approval"),
            approvals_stat: PathBuf::from("/usr/share/updater/approvals"),
            change_log: PathBuf::from("/usr/share/updater/updater-log"),
            error_log: PathBuf::from("/tmp/update-state/last_error"),
            crash_log: PathBuf::from("/tmp/updater_crash.log"),
            opkg_lock: PathBuf::from("/var/lock/opkg.lock"),
            userlists: PathBuf::from("/usr/share/updater/userlists.json"),
            l10n: PathBuf::from("/usr/share/updater/l10n_supported"),
            log_file: PathBuf::from("/var/log/updater-supervisor.log"),
        }
    }
}

/// How the update engine is invoked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Program followed by its fixed arguments.
    pub command: Vec<String>,
    /// Flag asking the engine to write an approval request to the given path.
    pub ask_flag: String,
    /// Flag telling the engine which plan hash is pre-approved.
    pub approve_flag: String,
    /// Seconds before the engine is asked to terminate.
    pub timeout_secs: u64,
    /// Seconds after termination before the engine is killed.
    pub kill_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "pkgupdate".to_string(),
                "--batch".to_string(),
                "--state-log".to_string(),
                "--task-log=/usr/share/updater/updater-log".to_string(),
            ],
            ask_flag: "--ask-approval".to_string(),
            approve_flag: "--approve".to_string(),
            timeout_secs: 3000,
            kill_timeout_secs: 60,
        }
    }
}

impl EngineConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn kill_timeout(&self) -> Duration {
        Duration::from_secs(self.kill_timeout_secs)
    }
}

/// External notification tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub create_command: Vec<String>,
    pub deliver_command: Vec<String>,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            create_command: vec!["create_notification".to_string()],
            deliver_command: vec!["notifier".to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub ping_address: String,
    /// Default bound for `--wait-for-network` without a value.
    pub ping_timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            ping_address: "repo.turris.cz".to_string(),
            ping_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Detach from the terminal before running.
    pub background: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub uci_binary: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            uci_binary: "uci".to_string(),
        }
    }
}

impl SupervisorConfig {
    /// Load configuration: defaults, then `path` (or the default location),
    /// then environment overrides.
    ///
    /// An explicitly given file must exist; the default location may be
    /// missing.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut parser = EnvParser::new();
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match parser.get_path("CONFIG") {
                Some(path) => (path, true),
                None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
            },
        };

        let mut config = match fs::read_to_string(&path) {
            Ok(content) => Self::from_toml(&content)
                .map_err(|err| SupervisorError::Config(format!("{}: {}", path.display(), err)))?,
            Err(err) if err.kind() == io::ErrorKind::NotFound && !required => {
                debug!(path = %path.display(), "No config file, using defaults");
                Self::default()
            }
            Err(err) => {
                return Err(SupervisorError::io(
                    format!("failed to read {}", path.display()),
                    err,
                ));
            }
        };

        config.apply_env(&mut parser);
        let errors = parser.take_errors();
        if !errors.is_empty() {
            let joined = errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(SupervisorError::Config(joined));
        }
        Ok(config)
    }

    pub fn from_toml(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Apply `SVUPD_*` overrides. Invalid values are recorded in `parser`.
    pub fn apply_env(&mut self, parser: &mut EnvParser) {
        let paths = &mut self.paths;
        for (name, slot) in [
            ("LOCK_FILE", &mut paths.lock_file),
            ("HOOK_FILE", &mut paths.hook_file),
            ("APPROVALS_ASK", &mut paths.approvals_ask),
            ("APPROVALS_STAT", &mut paths.approvals_stat),
            ("CHANGE_LOG", &mut paths.change_log),
        ] {
            if let Some(value) = parser.get_path(name) {
                *slot = value;
            }
        }
        if let Some(secs) = parser.get_u64_range("ENGINE_TIMEOUT_SECS", 1, 7 * 24 * 3600) {
            self.engine.timeout_secs = secs;
        }
        if let Some(secs) = parser.get_u64_range("ENGINE_KILL_TIMEOUT_SECS", 1, 24 * 3600) {
            self.engine.kill_timeout_secs = secs;
        }
        if let Some(background) = parser.get_bool("BACKGROUND") {
            self.run.background = background;
        }
    }

    /// Configuration with every shared file placed under `dir`, for tests
    /// and sandboxed runs.
    pub fn rooted_at(dir: &Path) -> Self {
        Self {
            paths: PathsConfig {
                lock_file: dir.join("updater-supervisor.pid"),
                hook_file: dir.join("updater-postrun-hook"),
                approvals_ask: dir.join("need_approval"),
                approvals_stat: dir.join("approvals"),
                change_log: dir.join("updater-log"),
                error_log: dir.join("last_error"),
                crash_log: dir.join("updater_crash.log"),
                opkg_lock: dir.join("opkg.lock"),
                userlists: dir.join("userlists.json"),
                l10n: dir.join("l10n_supported"),
                log_file: dir.join("updater-supervisor.log"),
            },
            ..Self::default()
        }
    }
}

#[cfg(test)]
pub(crate) fn env_test_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

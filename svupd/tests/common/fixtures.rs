use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

/// A sandboxed device: every file the supervisor touches lives in a temp
/// dir and the engine is a shell snippet. The config store only knows that
/// autorun is on; every other option reads as "not set" and writes fail.
pub struct Device {
    pub dir: TempDir,
    pub config: PathBuf,
}

impl Device {
    pub fn new(engine: &str) -> Self {
        crate::test_log!("FIXTURE: Creating sandboxed device");

        let dir = TempDir::new().expect("Failed to create temp dir");
        let root = dir.path();
        let config = root.join("config.toml");
        let path = |name: &str| toml_string(&root.join(name));
        let uci = root.join("uci");
        fs::write(&uci, UCI_STUB).expect("Failed to write uci stub");
        fs::set_permissions(&uci, fs::Permissions::from_mode(0o755))
            .expect("Failed to make uci stub executable");
        fs::write(
            &config,
            format!(
                r#"[paths]
lock_file = {lock}
hook_file = {hook}
approvals_ask = {ask}
approvals_stat = {stat}
change_log = {changes}
error_log = {error}
crash_log = {crash}
opkg_lock = {opkg}
userlists = {lists}
l10n = {l10n}
log_file = {log}

[engine]
command = ["sh", "-c", {engine}]

[notify]
create_command = ["true"]
deliver_command = ["true"]

[store]
uci_binary = {uci}
"#,
                lock = path("updater-supervisor.pid"),
                hook = path("updater-postrun-hook"),
                ask = path("need_approval"),
                stat = path("approvals"),
                changes = path("updater-log"),
                error = path("last_error"),
                crash = path("updater_crash.log"),
                opkg = path("opkg.lock"),
                lists = path("userlists.json"),
                l10n = path("l10n_supported"),
                log = path("svupd.log"),
                uci = path("uci"),
                engine = toml_string_raw(engine),
            ),
        )
        .expect("Failed to write config.toml");

        Self { dir, config }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    /// `svupd` with this device's configuration and a clean environment.
    pub fn svupd(&self) -> Command {
        let mut command = Command::new(env!("CARGO_BIN_EXE_svupd"));
        for (key, _) in std::env::vars_os() {
            if key.to_string_lossy().starts_with("SVUPD_") {
                command.env_remove(key);
            }
        }
        command.env("SVUPD_CONFIG", &self.config);
        command
    }

    pub fn run(&self, args: &[&str]) -> Output {
        self.svupd()
            .args(args)
            .output()
            .expect("Failed to run svupd")
    }
}

const UCI_STUB: &str = r#"#!/bin/sh
if [ "$*" = "-q get updater.override.disable" ]; then
    echo 0
    exit 0
fi
exit 1
"#;

fn toml_string(path: &Path) -> String {
    toml_string_raw(&path.to_string_lossy())
}

/// Quoted TOML basic string; the escapes used by `Debug` for plain ASCII
/// text are valid TOML.
fn toml_string_raw(value: &str) -> String {
    format!("{value:?}")
}

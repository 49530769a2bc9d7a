//! Read-only view of what the updater is doing right now.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use fs2::FileExt;
use serde::Serialize;

use crate::config::PathsConfig;
use crate::error::{IoContext, Result, SupervisorError};
use crate::fsutil::check_record_lock;
use crate::pidlock::{self, parse_pid};

/// Whether a supervisor instance is running, i.e. holds the pid lock.
pub fn updater_supervised(lock_file: &Path) -> Result<bool> {
    pidlock::is_locked(lock_file)
}

/// Whether somebody holds the package manager lock. That need not be the
/// updater. opkg takes a `lockf` record lock, not an `flock`.
pub fn opkg_locked(opkg_lock: &Path) -> Result<bool> {
    check_record_lock(opkg_lock).io_context(|| format!("failed to probe {}", opkg_lock.display()))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SupervisorStatus {
    pub running: bool,
    /// Pid recorded by the running instance. Unknown while it evaluates
    /// results, because the pid file is then closed to readers.
    pub pid: Option<i32>,
    pub opkg_locked: bool,
}

impl SupervisorStatus {
    pub fn probe(paths: &PathsConfig) -> Result<Self> {
        let running = updater_supervised(&paths.lock_file)?;
        // Reading the pid would block while the holder keeps reads out.
        let pid = if running {
            probe_pid(&paths.lock_file)?
        } else {
            None
        };
        Ok(Self {
            running,
            pid,
            opkg_locked: opkg_locked(&paths.opkg_lock)?,
        })
    }
}

/// Non-blocking variant of [`pidlock::holder_pid`].
fn probe_pid(lock_file: &Path) -> Result<Option<i32>> {
    let file = match File::open(lock_file) {
        Ok(file) => file,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(SupervisorError::io(
                format!("failed to open {}", lock_file.display()),
                err,
            ));
        }
    };
    if FileExt::try_lock_shared(&file).is_err() {
        return Ok(None);
    }
    let mut content = String::new();
    (&file)
        .read_to_string(&mut content)
        .io_context(|| format!("failed to read {}", lock_file.display()))?;
    Ok(parse_pid(&content))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SupervisorConfig;
    use crate::pidlock::PidLock;
    use tempfile::TempDir;

    #[test]
    fn test_idle_status() {
        let dir = TempDir::new().unwrap();
        let config = SupervisorConfig::rooted_at(dir.path());
        let status = SupervisorStatus::probe(&config.paths).unwrap();
        assert_eq!(
            status,
            SupervisorStatus {
                running: false,
                pid: None,
                opkg_locked: false
            }
        );
    }

    #[test]
    fn test_running_status() {
        let dir = TempDir::new().unwrap();
        let config = SupervisorConfig::rooted_at(dir.path());
        let mut lock = PidLock::new(&config.paths.lock_file).unwrap();
        assert!(lock.acquire(false).unwrap());

        let status = SupervisorStatus::probe(&config.paths).unwrap();
        assert!(status.running);
        assert_eq!(status.pid, None);

        lock.allow_shared_reads().unwrap();
        let status = SupervisorStatus::probe(&config.paths).unwrap();
        assert!(status.running);
        assert_eq!(status.pid, Some(std::process::id() as i32));
    }

    #[test]
    fn test_opkg_locked() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("opkg.lock");
        assert!(!opkg_locked(&path).unwrap());

        let holder = File::create(&path).unwrap();
        FileExt::lock_exclusive(&holder).unwrap();
        assert!(!opkg_locked(&path).unwrap());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_opkg_record_lock_is_seen() {
        use nix::fcntl::{FcntlArg, fcntl};
        use nix::libc;
        use std::fs::OpenOptions;
        use std::os::fd::AsFd;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("opkg.lock");
        let holder = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .unwrap();
        let region = libc::flock {
            l_type: libc::F_WRLCK as _,
            l_whence: libc::SEEK_SET as _,
            l_start: 0,
            l_len: 0,
            l_pid: 0,
        };
        fcntl(holder.as_fd(), FcntlArg::F_OFD_SETLK(&region)).unwrap();
        assert!(opkg_locked(&path).unwrap());

        let config = SupervisorConfig::rooted_at(dir.path());
        assert_eq!(config.paths.opkg_lock, path);
        assert!(SupervisorStatus::probe(&config.paths).unwrap().opkg_locked);
    }
}

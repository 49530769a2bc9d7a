//! Supervisor pid lock (the singleton guard).
//!
//! The lock file serves two purposes. Its `flock` state decides which
//! supervisor instance is the active one, and its content (the holder's pid)
//! lets any later invocation find the holder and send it [`RERUN_SIGNAL`]
//! instead of starting a second update.
//!
//! The holder keeps the lock exclusive while it evaluates results, which
//! stops readers from even opening it for the pid. It switches to a shared
//! lock while the update engine runs, opening a window in which other
//! invocations can read the pid and signal it.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use fs2::FileExt;
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use signal_hook::SigId;
use tracing::{debug, info, warn};

use crate::error::{IoContext, Result, SupervisorError};
use crate::fsutil::{check_exclusive_lock, is_contended, is_current_file, remove_if_exists};

/// Signal asking the lock holder to run the update engine once more.
pub const RERUN_SIGNAL: Signal = Signal::SIGUSR1;

/// How many times a lock or read is retried when the file is replaced under us.
const MAX_REPLACE_RETRIES: u32 = 8;

/// Delivers signals to other processes.
///
/// `signal == None` is the liveness probe (`kill(pid, 0)`).
pub trait SignalSender: Send + Sync {
    fn send(&self, pid: i32, signal: Option<Signal>) -> std::result::Result<(), Errno>;
}

/// [`SignalSender`] backed by `kill(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct KillSender;

impl SignalSender for KillSender {
    fn send(&self, pid: i32, signal: Option<Signal>) -> std::result::Result<(), Errno> {
        kill(Pid::from_raw(pid), signal)
    }
}

/// Handle on the supervisor pid lock.
///
/// Only one handle per process should exist because it owns the
/// [`RERUN_SIGNAL`] flag. The lock is released when the handle is dropped.
pub struct PidLock {
    path: PathBuf,
    file: Option<File>,
    rerun: Arc<AtomicBool>,
    handler: Option<SigId>,
    sender: Arc<dyn SignalSender>,
}

impl PidLock {
    /// Create a handle for `path` that signals other instances with `kill(2)`.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        Self::with_sender(path, Arc::new(KillSender))
    }

    /// Create a handle using a custom signal sender.
    ///
    /// Installs the [`RERUN_SIGNAL`] handler. The handler only records that
    /// the signal arrived; [`PidLock::take_rerun_request`] reads it.
    pub fn with_sender(path: impl Into<PathBuf>, sender: Arc<dyn SignalSender>) -> Result<Self> {
        let rerun = Arc::new(AtomicBool::new(false));
        let handler = signal_hook::flag::register(RERUN_SIGNAL as i32, Arc::clone(&rerun))
            .io_context(|| "failed to install rerun signal handler")?;
        Ok(Self {
            path: path.into(),
            file: None,
            rerun,
            handler: Some(handler),
            sender,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether this handle currently holds the lock.
    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    /// Return whether a rerun was requested since the last call, clearing it.
    pub fn take_rerun_request(&self) -> bool {
        self.rerun.swap(false, Ordering::SeqCst)
    }

    /// Shared flag set by the rerun signal handler.
    pub fn rerun_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.rerun)
    }

    /// Try to take the lock without blocking.
    ///
    /// Unless `overtake` is set the file is created exclusively, so an
    /// existing file (held or stale) makes this return `false`. After the
    /// `flock` succeeds the handle checks that the file it locked is still the
    /// one on disk and starts over if it was replaced.
    pub fn try_acquire(&mut self, overtake: bool) -> Result<bool> {
        if self.file.is_some() {
            return Ok(true);
        }
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .io_context(|| format!("failed to create {}", parent.display()))?;
        }

        for attempt in 1..=MAX_REPLACE_RETRIES {
            let mut options = OpenOptions::new();
            options.read(true).write(true);
            if overtake {
                options.create(true).truncate(false);
            } else {
                options.create_new(true);
            }

            let file = match options.open(&self.path) {
                Ok(file) => file,
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
                Err(err) => {
                    return Err(SupervisorError::io(
                        format!("failed to open {}", self.path.display()),
                        err,
                    ));
                }
            };

            match FileExt::try_lock_exclusive(&file) {
                Ok(()) => {}
                Err(err) if is_contended(&err) => return Ok(false),
                Err(err) => {
                    return Err(SupervisorError::io(
                        format!("failed to lock {}", self.path.display()),
                        err,
                    ));
                }
            }

            if !is_current_file(&file, &self.path)
                .io_context(|| format!("failed to stat {}", self.path.display()))?
            {
                debug!(attempt, path = %self.path.display(), "pid file replaced before lock, retrying");
                continue;
            }

            write_pid(&file)
                .io_context(|| format!("failed to write pid to {}", self.path.display()))?;
            self.file = Some(file);
            return Ok(true);
        }

        Err(SupervisorError::LockChurn {
            path: self.path.clone(),
            attempts: MAX_REPLACE_RETRIES,
        })
    }

    /// Take the lock, or notify the instance that holds it.
    ///
    /// Returns `true` when this handle now holds the lock. Returns `false`
    /// when another live instance holds it; that instance has been sent
    /// [`RERUN_SIGNAL`] if `send_signal` is set, otherwise only probed. A
    /// lock whose recorded pid no longer exists is overtaken.
    pub fn acquire(&mut self, send_signal: bool) -> Result<bool> {
        if self.try_acquire(false)? {
            return Ok(true);
        }

        let pid = match holder_pid(&self.path)? {
            Some(pid) => pid,
            None => {
                warn!("Taking pid lock failed but no pid could be loaded, trying to overtake it");
                if self.try_acquire(true)? {
                    return Ok(true);
                }
                match holder_pid(&self.path)? {
                    Some(pid) => pid,
                    None => {
                        warn!("Pid lock overtake failed and holder is unknown, giving up");
                        return Ok(false);
                    }
                }
            }
        };

        let signal = send_signal.then_some(RERUN_SIGNAL);
        match self.sender.send(pid, signal) {
            Ok(()) => {
                if send_signal {
                    info!(pid, "Another instance is already running, it was asked to run the update engine again");
                } else {
                    info!(pid, "Another instance of the supervisor is already running");
                }
                Ok(false)
            }
            Err(Errno::ESRCH) => {
                warn!(pid, "No process with the stored pid is running, overtaking the pid lock");
                if self.try_acquire(true)? {
                    Ok(true)
                } else {
                    warn!("Pid lock overtake failed, giving up");
                    Ok(false)
                }
            }
            Err(errno) => Err(SupervisorError::Signal { pid, errno }),
        }
    }

    /// Release the lock and remove the lock file.
    ///
    /// Escalates to an exclusive lock first so nobody is reading the pid while
    /// the file is unlinked.
    pub fn release(&mut self) -> Result<()> {
        let file = self.file.take().ok_or(SupervisorError::LockNotHeld)?;
        FileExt::lock_exclusive(&file)
            .io_context(|| format!("failed to lock {}", self.path.display()))?;
        remove_if_exists(&self.path)
            .io_context(|| format!("failed to remove {}", self.path.display()))?;
        drop(file);
        debug!(path = %self.path.display(), "Pid lock released");
        Ok(())
    }

    /// Switch to an exclusive lock, blocking pid readers.
    pub fn block_reads(&self) -> Result<()> {
        let file = self.file.as_ref().ok_or(SupervisorError::LockNotHeld)?;
        FileExt::lock_exclusive(file)
            .io_context(|| format!("failed to lock {} exclusively", self.path.display()))
    }

    /// Switch to a shared lock so other invocations can read our pid.
    pub fn allow_shared_reads(&self) -> Result<()> {
        let file = self.file.as_ref().ok_or(SupervisorError::LockNotHeld)?;
        FileExt::lock_shared(file)
            .io_context(|| format!("failed to lock {} shared", self.path.display()))
    }
}

impl Drop for PidLock {
    fn drop(&mut self) {
        if self.file.is_some()
            && let Err(err) = self.release()
        {
            warn!("Failed to release pid lock: {}", err);
        }
        if let Some(handler) = self.handler.take() {
            signal_hook::low_level::unregister(handler);
        }
    }
}

impl std::fmt::Debug for PidLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PidLock")
            .field("path", &self.path)
            .field("held", &self.file.is_some())
            .field("rerun", &self.rerun.load(Ordering::SeqCst))
            .finish()
    }
}

/// Whether some supervisor instance holds the pid lock.
///
/// Does not check that the holder is alive.
pub fn is_locked(path: &Path) -> Result<bool> {
    check_exclusive_lock(path).io_context(|| format!("failed to probe {}", path.display()))
}

/// Pid recorded in the lock file, or `None` when there is no file or its
/// content is not a pid.
///
/// Waits for a shared lock, so this blocks while the holder keeps reads
/// blocked.
pub fn holder_pid(path: &Path) -> Result<Option<i32>> {
    for attempt in 1..=MAX_REPLACE_RETRIES {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(SupervisorError::io(
                    format!("failed to open {}", path.display()),
                    err,
                ));
            }
        };
        FileExt::lock_shared(&file).io_context(|| format!("failed to lock {}", path.display()))?;
        if !is_current_file(&file, path).io_context(|| format!("failed to stat {}", path.display()))? {
            debug!(attempt, path = %path.display(), "pid file replaced while reading, retrying");
            continue;
        }
        let mut content = String::new();
        (&file)
            .read_to_string(&mut content)
            .io_context(|| format!("failed to read {}", path.display()))?;
        return Ok(parse_pid(&content));
    }
    Err(SupervisorError::LockChurn {
        path: path.to_path_buf(),
        attempts: MAX_REPLACE_RETRIES,
    })
}

pub(crate) fn parse_pid(content: &str) -> Option<i32> {
    content
        .lines()
        .next()?
        .trim()
        .parse::<i32>()
        .ok()
        .filter(|pid| *pid > 0)
}

fn write_pid(mut file: &File) -> io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(std::process::id().to_string().as_bytes())?;
    file.sync_all()
}

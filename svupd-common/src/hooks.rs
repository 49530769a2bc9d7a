//! Post-run hook queue.
//!
//! Hooks are single-line shell commands executed once the supervisor's run
//! loop finishes, whether the engine succeeded, failed or stopped to ask for
//! approval. They are queued in a file (one command per line) that is only
//! touched under an exclusive `flock`. When no supervisor is running a hook
//! is executed right away instead.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use fs2::FileExt;
use tracing::{info, warn};

use crate::error::{IoContext, Result, SupervisorError};
use crate::fsutil::{is_current_file, remove_if_exists};
use crate::pidlock;
use crate::runner::exit_code;

const MAX_REPLACE_RETRIES: u32 = 8;

/// What happened to a registered hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookRegistration {
    /// Appended to the queue; it runs when the active supervisor finishes.
    Queued,
    /// No supervisor was running, so the hook ran immediately with this exit code.
    RanImmediately(i32),
}

/// Hook queue backed by `hook_file`, tied to the pid lock at `lock_file`.
#[derive(Debug, Clone)]
pub struct HookQueue {
    hook_file: PathBuf,
    lock_file: PathBuf,
}

impl HookQueue {
    pub fn new(hook_file: impl Into<PathBuf>, lock_file: impl Into<PathBuf>) -> Self {
        Self {
            hook_file: hook_file.into(),
            lock_file: lock_file.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.hook_file
    }

    /// Register `command` to run after the current supervisor run.
    pub fn register(&self, command: &str) -> Result<HookRegistration> {
        if command.contains('\n') || command.contains('\r') {
            return Err(SupervisorError::InvalidHookCommand(command.to_string()));
        }

        if !pidlock::is_locked(&self.lock_file)? {
            return self.run_now(command);
        }

        let file = self.open_locked_for_append()?;
        if !pidlock::is_locked(&self.lock_file)? {
            // The supervisor finished while we waited for the queue lock.
            let len = file
                .metadata()
                .io_context(|| format!("failed to stat {}", self.hook_file.display()))?
                .len();
            if len == 0 {
                remove_if_exists(&self.hook_file)
                    .io_context(|| format!("failed to remove {}", self.hook_file.display()))?;
            }
            drop(file);
            return self.run_now(command);
        }

        let mut file = file;
        file.write_all(format!("{command}\n").as_bytes())
            .and_then(|()| file.flush())
            .io_context(|| format!("failed to append to {}", self.hook_file.display()))?;
        info!("Postrun hook registered: {}", command);
        Ok(HookRegistration::Queued)
    }

    /// Register several commands, in order. Each one is appended on its own.
    pub fn register_many<I, S>(&self, commands: I) -> Result<Vec<HookRegistration>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        commands
            .into_iter()
            .map(|command| self.register(command.as_ref()))
            .collect()
    }

    /// Run every queued command and delete the queue. Returns how many ran.
    ///
    /// A failing command is reported and the rest still run.
    pub fn drain_and_run(&self) -> Result<usize> {
        let file = match OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.hook_file)
        {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(err) => {
                return Err(SupervisorError::io(
                    format!("failed to open {}", self.hook_file.display()),
                    err,
                ));
            }
        };
        FileExt::lock_exclusive(&file)
            .io_context(|| format!("failed to lock {}", self.hook_file.display()))?;

        let mut content = String::new();
        (&file)
            .read_to_string(&mut content)
            .io_context(|| format!("failed to read {}", self.hook_file.display()))?;

        let mut ran = 0;
        for command in content.lines().map(str::trim).filter(|c| !c.is_empty()) {
            match run_command(command) {
                Ok(_) => ran += 1,
                Err(err) => warn!("Postrun hook could not be started: {}", err),
            }
        }

        fs::remove_file(&self.hook_file)
            .io_context(|| format!("failed to remove {}", self.hook_file.display()))?;
        drop(file);
        Ok(ran)
    }

    fn run_now(&self, command: &str) -> Result<HookRegistration> {
        let code = run_command(command)?;
        Ok(HookRegistration::RanImmediately(code))
    }

    fn open_locked_for_append(&self) -> Result<File> {
        for _ in 0..MAX_REPLACE_RETRIES {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.hook_file)
                .io_context(|| format!("failed to open {}", self.hook_file.display()))?;
            FileExt::lock_exclusive(&file)
                .io_context(|| format!("failed to lock {}", self.hook_file.display()))?;
            if is_current_file(&file, &self.hook_file)
                .io_context(|| format!("failed to stat {}", self.hook_file.display()))?
            {
                return Ok(file);
            }
            // Drained and removed between our open and lock.
        }
        Err(SupervisorError::LockChurn {
            path: self.hook_file.clone(),
            attempts: MAX_REPLACE_RETRIES,
        })
    }
}

/// Run one shell command, streaming its output to the log. Returns its exit
/// code; a non-zero code is reported, not raised.
pub fn run_command(command: &str) -> Result<i32> {
    info!("Running command: {}", command);
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| SupervisorError::Spawn {
            program: command.to_string(),
            source,
        })?;

    let readers: Vec<_> = [
        child.stdout.take().map(|s| Box::new(s) as Box<dyn Read + Send>),
        child.stderr.take().map(|s| Box::new(s) as Box<dyn Read + Send>),
    ]
    .into_iter()
    .flatten()
    .map(|stream| {
        thread::spawn(move || {
            for line in BufReader::new(stream).lines().map_while(|l| l.ok()) {
                info!("{}", line);
            }
        })
    })
    .collect();

    let status = child
        .wait()
        .io_context(|| format!("failed to wait for {command}"))?;
    for reader in readers {
        let _ = reader.join();
    }

    let code = exit_code(status);
    if code != 0 {
        warn!("Command failed with exit code: {}", code);
    }
    Ok(code)
}

//! Update engine runner.
//!
//! Spawns the engine once, drains its stdout and stderr on two reader threads
//! into one shared trace, and enforces a soft timeout (SIGTERM) followed by a
//! hard timeout (SIGKILL). The engine leads its own process group and every
//! signal goes to the whole group, so helpers it spawned cannot outlive it.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tracing::{debug, warn};

use crate::error::{IoContext, Result, SupervisorError};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// One supervised run of the update engine.
pub struct EngineRunner {
    verbose: bool,
    started: bool,
    program: String,
    child: Option<Child>,
    trace: Arc<Mutex<String>>,
    readers: Vec<JoinHandle<()>>,
}

impl EngineRunner {
    /// With `verbose` every captured line is also echoed to the matching
    /// standard stream.
    pub fn new(verbose: bool) -> Self {
        Self {
            verbose,
            started: false,
            program: String::new(),
            child: None,
            trace: Arc::new(Mutex::new(String::new())),
            readers: Vec::new(),
        }
    }

    /// Spawn `program` with `args`. Allowed once per runner.
    pub fn start(&mut self, program: &str, args: &[String]) -> Result<()> {
        if self.started {
            return Err(SupervisorError::AlreadyStarted);
        }
        self.started = true;
        self.program = program.to_string();

        debug!(program, ?args, "Spawning update engine");
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .spawn()
            .map_err(|source| SupervisorError::Spawn {
                program: program.to_string(),
                source,
            })?;

        if let Some(stdout) = child.stdout.take() {
            self.readers.push(self.spawn_reader(stdout, Stream::Stdout)?);
        }
        if let Some(stderr) = child.stderr.take() {
            self.readers.push(self.spawn_reader(stderr, Stream::Stderr)?);
        }
        self.child = Some(child);
        Ok(())
    }

    /// Wait for the engine to exit and return its exit code.
    ///
    /// After `soft_timeout` the engine is sent SIGTERM; if it is still alive
    /// `hard_timeout` later it is killed. A `None` timeout never fires.
    /// Returns only after both reader threads drained their streams. An engine
    /// killed by a signal reports `128 + signal`.
    pub fn join(
        &mut self,
        soft_timeout: Option<Duration>,
        hard_timeout: Option<Duration>,
    ) -> Result<i32> {
        let mut child = self.child.take().ok_or(SupervisorError::NotStarted)?;
        let status = supervise(&mut child, soft_timeout, hard_timeout)
            .io_context(|| format!("failed to wait for {}", self.program))?;

        for reader in self.readers.drain(..) {
            if reader.join().is_err() {
                warn!("Update engine output reader panicked");
            }
        }
        Ok(exit_code(status))
    }

    /// Everything the engine printed so far, stdout and stderr interleaved.
    pub fn trace(&self) -> String {
        self.trace
            .lock()
            .map(|trace| trace.clone())
            .unwrap_or_default()
    }

    /// Consume the runner, returning the captured trace.
    pub fn into_trace(self) -> String {
        self.trace()
    }

    fn spawn_reader<R>(&self, stream: R, kind: Stream) -> Result<JoinHandle<()>>
    where
        R: Read + Send + 'static,
    {
        let trace = Arc::clone(&self.trace);
        let verbose = self.verbose;
        let name = match kind {
            Stream::Stdout => "engine-stdout",
            Stream::Stderr => "engine-stderr",
        };
        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || capture_lines(stream, kind, &trace, verbose))
            .io_context(|| format!("failed to spawn {name} reader"))
    }
}

impl Drop for EngineRunner {
    fn drop(&mut self) {
        // Never leave an orphaned engine behind.
        if let Some(mut child) = self.child.take()
            && matches!(child.try_wait(), Ok(None))
        {
            warn!(pid = child.id(), "Terminating still running update engine");
            let _ = signal_group(&child, Signal::SIGKILL);
            let _ = child.wait();
        }
    }
}

fn capture_lines<R: Read>(stream: R, kind: Stream, trace: &Mutex<String>, verbose: bool) {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let mut line = String::from_utf8_lossy(&buf).into_owned();
                if !line.ends_with('\n') {
                    line.push('\n');
                }
                if verbose {
                    echo(kind, &line);
                }
                if let Ok(mut trace) = trace.lock() {
                    trace.push_str(&line);
                }
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                debug!("Stopped reading engine output: {}", err);
                break;
            }
        }
    }
}

fn echo(kind: Stream, line: &str) {
    match kind {
        Stream::Stdout => {
            let mut out = io::stdout().lock();
            let _ = out.write_all(line.as_bytes());
            let _ = out.flush();
        }
        Stream::Stderr => {
            let mut err = io::stderr().lock();
            let _ = err.write_all(line.as_bytes());
            let _ = err.flush();
        }
    }
}

fn supervise(
    child: &mut Child,
    soft_timeout: Option<Duration>,
    hard_timeout: Option<Duration>,
) -> io::Result<ExitStatus> {
    let started = Instant::now();
    let soft_deadline = soft_timeout.map(|t| started + t);
    let mut kill_deadline: Option<Instant> = None;
    let mut terminated = false;

    loop {
        if let Some(status) = child.try_wait()? {
            if terminated {
                // Stragglers would keep the output pipes open.
                signal_group(child, Signal::SIGKILL)?;
            }
            return Ok(status);
        }
        let now = Instant::now();

        if !terminated && soft_deadline.is_some_and(|deadline| now >= deadline) {
            warn!("Timeout ran out, terminating update engine");
            signal_group(child, Signal::SIGTERM)?;
            terminated = true;
            kill_deadline = hard_timeout.map(|t| now + t);
        }

        if kill_deadline.is_some_and(|deadline| now >= deadline) {
            warn!("Kill timeout ran out, killing update engine");
            signal_group(child, Signal::SIGKILL)?;
            return child.wait();
        }

        thread::sleep(POLL_INTERVAL);
    }
}

/// Signal the engine's process group; a group with no members left is fine.
fn signal_group(child: &Child, signal: Signal) -> io::Result<()> {
    match killpg(Pid::from_raw(child.id() as i32), signal) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(errno) => Err(io::Error::from(errno)),
    }
}

/// Exit code of a finished process; `128 + N` when killed by signal `N`.
pub fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => -1,
    }
}

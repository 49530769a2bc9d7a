//! The supervisor run loop.
//!
//! ```text
//! Acquiring -> Running -> Evaluating -> Done
//!                 ^            |
//!                 +-- rerun ---+
//! ```
//!
//! The pid lock is held for the whole loop. It is shared only while the
//! engine runs; that is the window in which another invocation can read our
//! pid and ask for a rerun.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::approvals::ApprovalGate;
use crate::config::SupervisorConfig;
use crate::error::{Result, SupervisorError};
use crate::hooks::HookQueue;
use crate::notify::{self, CommandNotifier, Notifier, create_logged};
use crate::pidlock::{KillSender, PidLock, SignalSender};
use crate::runner::EngineRunner;
use crate::settings::UpdaterSettings;
use crate::store::{ConfigStore, UciStore};

/// Exit status used when another supervisor instance holds the lock
/// (`EX_TEMPFAIL`).
pub const EXIT_ALREADY_RUNNING: i32 = 75;

/// Parameters of one supervisor run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// Ask an already running instance to run the engine again.
    pub ensure_run: bool,
    /// Soft timeout for one engine run; `None` waits forever.
    pub timeout: Option<Duration>,
    /// Grace period between terminate and kill.
    pub kill_timeout: Option<Duration>,
    /// Echo the engine's output.
    pub verbose: bool,
    /// Post-run hooks registered once the lock is held.
    pub hooks: Vec<String>,
    /// Run even when updates are disabled in the device configuration.
    pub force: bool,
}

impl RunOptions {
    pub fn from_config(config: &SupervisorConfig) -> Self {
        Self {
            ensure_run: false,
            timeout: Some(config.engine.timeout()),
            kill_timeout: Some(config.engine.kill_timeout()),
            verbose: false,
            hooks: Vec::new(),
            force: false,
        }
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::from_config(&SupervisorConfig::default())
    }
}

/// Result of [`Supervisor::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The loop ran; exit code of the last engine run.
    Finished(i32),
    /// Another instance holds the lock (and was signalled if asked to).
    AlreadyRunning,
}

impl RunOutcome {
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Finished(code) => code,
            Self::AlreadyRunning => EXIT_ALREADY_RUNNING,
        }
    }
}

#[derive(Debug)]
enum RunState {
    Acquiring,
    Running,
    Evaluating { exit_code: i32, trace: String },
    Done { exit_code: i32 },
}

/// Runs the update engine under the machine-wide pid lock.
pub struct Supervisor {
    config: SupervisorConfig,
    settings: UpdaterSettings,
    notifier: Arc<dyn Notifier>,
    sender: Arc<dyn SignalSender>,
}

impl Supervisor {
    pub fn new(
        config: SupervisorConfig,
        store: Arc<dyn ConfigStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            settings: UpdaterSettings::new(store),
            notifier,
            sender: Arc::new(KillSender),
        }
    }

    /// Supervisor talking to `uci` and the notification commands named in
    /// `config`.
    pub fn from_config(config: SupervisorConfig) -> Self {
        let store = Arc::new(UciStore::new(config.store.uci_binary.clone()));
        let notifier = Arc::new(CommandNotifier::new(
            config.notify.create_command.clone(),
            config.notify.deliver_command.clone(),
        ));
        Self::new(config, store, notifier)
    }

    pub fn with_signal_sender(mut self, sender: Arc<dyn SignalSender>) -> Self {
        self.sender = sender;
        self
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn settings(&self) -> &UpdaterSettings {
        &self.settings
    }

    pub fn approvals(&self) -> ApprovalGate {
        ApprovalGate::new(
            &self.config.paths.approvals_ask,
            &self.config.paths.approvals_stat,
            self.settings.clone(),
        )
    }

    pub fn hooks(&self) -> HookQueue {
        HookQueue::new(&self.config.paths.hook_file, &self.config.paths.lock_file)
    }

    /// Run the supervisor loop in the calling thread.
    pub fn run(&self, options: &RunOptions) -> Result<RunOutcome> {
        if !options.force && !self.settings.enabled()? {
            return Err(SupervisorError::Disabled);
        }
        if let Some(bad) = options.hooks.iter().find(|h| h.contains(['\n', '\r'])) {
            return Err(SupervisorError::InvalidHookCommand(bad.clone()));
        }

        let mut lock = PidLock::with_sender(&self.config.paths.lock_file, Arc::clone(&self.sender))?;
        let hooks = self.hooks();
        let mut state = RunState::Acquiring;

        loop {
            state = match state {
                RunState::Acquiring => {
                    if !lock.acquire(options.ensure_run)? {
                        return Ok(RunOutcome::AlreadyRunning);
                    }
                    hooks.register_many(&options.hooks)?;
                    RunState::Running
                }
                RunState::Running => {
                    lock.allow_shared_reads()?;
                    let (exit_code, trace) = self.run_engine(options)?;
                    RunState::Evaluating { exit_code, trace }
                }
                RunState::Evaluating { exit_code, trace } => {
                    self.evaluate(exit_code, &trace);
                    lock.block_reads()?;
                    if lock.take_rerun_request() {
                        info!("Rerunning update engine as requested");
                        RunState::Running
                    } else {
                        RunState::Done { exit_code }
                    }
                }
                RunState::Done { exit_code } => {
                    if let Err(err) = hooks.drain_and_run() {
                        error!("Running postrun hooks failed: {}", err);
                    }
                    if let Err(err) = self.notifier.deliver() {
                        warn!("Notification delivery failed: {}", err);
                    }
                    lock.release()?;
                    return Ok(RunOutcome::Finished(exit_code));
                }
            };
        }
    }

    /// Engine program and arguments for the next run.
    pub fn engine_command(&self) -> Result<(String, Vec<String>)> {
        let engine = &self.config.engine;
        let (program, fixed) = engine
            .command
            .split_first()
            .ok_or_else(|| SupervisorError::Config("engine command is empty".to_string()))?;

        let mut args = fixed.to_vec();
        if self.settings.approvals_needed()? {
            args.push(format!(
                "{}={}",
                engine.ask_flag,
                self.config.paths.approvals_ask.display()
            ));
            if let Some(hash) = self.approvals().resolved_hash()? {
                args.push(format!("{}={}", engine.approve_flag, hash));
            }
        }
        Ok((program.clone(), args))
    }

    fn run_engine(&self, options: &RunOptions) -> Result<(i32, String)> {
        let (program, args) = self.engine_command()?;
        let mut runner = EngineRunner::new(options.verbose);
        info!("Running update engine");
        runner.start(&program, &args)?;
        let exit_code = runner.join(options.timeout, options.kill_timeout)?;
        if exit_code != 0 {
            warn!("Update engine exited with: {}", exit_code);
        }
        Ok((exit_code, runner.into_trace()))
    }

    /// Post-run bookkeeping. Nothing here fails the run; problems are logged.
    fn evaluate(&self, exit_code: i32, trace: &str) {
        let paths = &self.config.paths;
        let notifier = self.notifier.as_ref();

        if let Some(notification) =
            notify::take_failure(exit_code, Some(trace), &paths.error_log, &paths.crash_log)
        {
            create_logged(notifier, &notification);
        }

        if let Err(err) = self.approvals().refresh(notifier) {
            warn!("Updating approval request failed: {}", err);
        }

        match notify::take_changes(&paths.change_log) {
            Ok(Some(notification)) => create_logged(notifier, &notification),
            Ok(None) => {}
            Err(err) => warn!("Reading change log failed: {}", err),
        }
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

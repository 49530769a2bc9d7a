//! Updater supervisor library.
//!
//! Runs the package update engine under a machine-wide pid lock, queues
//! post-run hooks, keeps the approval handshake with the engine and turns run
//! results into user notifications.

pub mod approvals;
pub mod compat;
pub mod config;
pub mod error;
pub mod fsutil;
pub mod hooks;
pub mod l10n;
pub mod lists;
pub mod logging;
pub mod notify;
pub mod pidlock;
pub mod prerun;
pub mod runner;
pub mod settings;
pub mod status;
pub mod store;
pub mod supervisor;
pub mod testing;

pub use approvals::{ApprovalGate, ApprovalRequest, ApprovalStatus, RebootMode, RefreshOutcome};
pub use config::{EnvError, EnvParser, SupervisorConfig};
pub use error::{Result, SupervisorError};
pub use fsutil::ReadOutcome;
pub use hooks::{HookQueue, HookRegistration};
pub use logging::{LogConfig, LogFormat, LoggingGuards, init_logging};
pub use notify::{CommandNotifier, Notification, Notifier, Severity};
pub use pidlock::{KillSender, PidLock, SignalSender};
pub use runner::EngineRunner;
pub use settings::UpdaterSettings;
pub use status::{SupervisorStatus, opkg_locked, updater_supervised};
pub use store::{ConfigStore, MemoryStore, UciStore};
pub use supervisor::{EXIT_ALREADY_RUNNING, RunOptions, RunOutcome, Supervisor};

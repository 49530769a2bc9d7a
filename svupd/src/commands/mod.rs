//! Subcommand implementations.

pub mod approvals;
pub mod helpers;
pub mod hook;
pub mod lists;
pub mod run;
pub mod settings;
pub mod status;

use serde::Serialize;
use svupd_common::{Supervisor, SupervisorConfig};

pub use approvals::ApprovalsCommand;
pub use lists::{L10nCommand, ListsCommand};
pub use run::RunArgs;
pub use settings::ConfigCommand;

/// Everything a subcommand needs besides its own arguments.
#[derive(Debug, Clone)]
pub struct Context {
    pub config: SupervisorConfig,
    pub verbose: bool,
    pub json: bool,
}

impl Context {
    pub fn supervisor(&self) -> Supervisor {
        Supervisor::from_config(self.config.clone())
    }

    /// Print `value` as pretty JSON; returns false when text output was
    /// requested instead.
    pub fn print_json<T: Serialize>(&self, value: &T) -> anyhow::Result<bool> {
        if !self.json {
            return Ok(false);
        }
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(true)
    }
}

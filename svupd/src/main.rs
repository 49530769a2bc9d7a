//! Updater supervisor
//!
//! Runs the package update engine under a machine-wide lock and manages the
//! settings around it: autorun, approvals, package lists and languages.

#![forbid(unsafe_code)]

mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use svupd_common::{LogConfig, SupervisorConfig, init_logging};
use tracing::error;

use crate::commands::{
    ApprovalsCommand, ConfigCommand, Context, L10nCommand, ListsCommand, RunArgs,
};

#[derive(Parser)]
#[command(name = "svupd")]
#[command(author, version, about = "Updater supervisor - runs the package update engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Supervisor configuration file
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Debug logging and live engine output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print `show` output as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the update engine
    Run(RunArgs),

    /// Report whether the supervisor is running
    Status,

    /// Inspect and resolve the pending approval request
    Approvals {
        #[command(subcommand)]
        action: ApprovalsCommand,
    },

    /// Register commands to run after the current (or next) engine run
    ///
    /// When no supervisor is running the commands run right away.
    Hook {
        /// Single-line shell commands
        #[arg(required = true, value_name = "CMD")]
        commands: Vec<String>,
    },

    /// Updater settings in the device configuration
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },

    /// Optional package lists
    Lists {
        #[command(subcommand)]
        action: ListsCommand,
    },

    /// Localisation packages
    L10n {
        #[command(subcommand)]
        action: L10nCommand,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = SupervisorConfig::load(cli.config.as_deref());

    let mut log_config = LogConfig::from_env("info").with_stderr();
    if cli.verbose {
        log_config = log_config.with_level("debug");
    }
    if let Ok(config) = &config {
        log_config = log_config.with_file(&config.paths.log_file);
    }
    let _logging_guards = match init_logging(&log_config) {
        Ok(guards) => Some(guards),
        Err(err) => {
            eprintln!("svupd: {err}");
            None
        }
    };

    let result = config
        .map_err(anyhow::Error::from)
        .and_then(|config| {
            let ctx = Context {
                config,
                verbose: cli.verbose,
                json: cli.json,
            };
            dispatch(&ctx, cli.command)
        });

    match result {
        Ok(code) => ExitCode::from(exit_status(code)),
        Err(err) => {
            error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn dispatch(ctx: &Context, command: Commands) -> Result<i32> {
    match command {
        Commands::Run(args) => commands::run::run(ctx, args),
        Commands::Status => commands::status::status(ctx).map(|()| 0),
        Commands::Approvals { action } => commands::approvals::approvals(ctx, action).map(|()| 0),
        Commands::Hook { commands } => commands::hook::hook(ctx, &commands),
        Commands::Config { action } => commands::settings::config(ctx, action).map(|()| 0),
        Commands::Lists { action } => commands::lists::lists(ctx, action).map(|()| 0),
        Commands::L10n { action } => commands::lists::l10n(ctx, action).map(|()| 0),
    }
}

/// Codes outside `0..=255` cannot be reported and become a plain failure.
fn exit_status(code: i32) -> u8 {
    u8::try_from(code).unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_flags() {
        let cli = Cli::try_parse_from([
            "svupd",
            "run",
            "--ensure-run",
            "--timeout",
            "50m",
            "--wait-for-network",
            "--hook",
            "echo done",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert!(args.ensure_run);
        assert_eq!(args.timeout, Some(std::time::Duration::from_secs(3000)));
        assert_eq!(args.wait_for_network, Some(None));
        assert_eq!(args.hooks, vec!["echo done"]);
    }

    #[test]
    fn test_parse_wait_for_network_value() {
        let cli = Cli::try_parse_from(["svupd", "run", "--wait-for-network=30s"]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(
            args.wait_for_network,
            Some(Some(std::time::Duration::from_secs(30)))
        );
    }

    #[test]
    fn test_hook_requires_command() {
        assert!(Cli::try_parse_from(["svupd", "hook"]).is_err());
    }

    #[test]
    fn test_exit_code_mapping() {
        assert_eq!(exit_status(0), 0);
        assert_eq!(exit_status(75), 75);
        assert_eq!(exit_status(-1), 1);
        assert_eq!(exit_status(300), 1);
    }
}

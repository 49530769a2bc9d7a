//! `svupd run`

use std::env;
use std::ffi::OsString;
use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::{Context as _, Result};
use clap::Args;
use svupd_common::prerun::{random_sleep, wait_for_network};
use svupd_common::{RunOptions, RunOutcome, SupervisorError};
use tracing::{debug, info, warn};

use super::Context;

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Ask an already running supervisor to run the engine once more
    #[arg(long)]
    pub ensure_run: bool,

    /// Terminate the engine after this long (e.g. `50m`)
    #[arg(long, value_name = "DUR", value_parser = humantime::parse_duration)]
    pub timeout: Option<Duration>,

    /// Kill the engine this long after terminating it
    #[arg(long, value_name = "DUR", value_parser = humantime::parse_duration)]
    pub kill_timeout: Option<Duration>,

    /// Wait for the repository to answer pings before running
    #[arg(
        long,
        value_name = "DUR",
        num_args = 0..=1,
        require_equals = true,
        value_parser = humantime::parse_duration
    )]
    pub wait_for_network: Option<Option<Duration>>,

    /// Delay the start by a random number of seconds below SECS
    #[arg(long, value_name = "SECS")]
    pub rand_sleep: Option<u64>,

    /// Command to run once the engine finishes
    #[arg(long = "hook", value_name = "CMD")]
    pub hooks: Vec<String>,

    /// Run even if updates are disabled
    #[arg(long)]
    pub force: bool,

    /// Detach and run in the background
    #[arg(long)]
    pub background: bool,
}

pub fn run(ctx: &Context, args: RunArgs) -> Result<i32> {
    let supervisor = ctx.supervisor();
    let config = supervisor.config();

    if args.background || config.run.background {
        if !args.force && !supervisor.settings().enabled()? {
            return Err(SupervisorError::Disabled.into());
        }
        spawn_detached()?;
        return Ok(0);
    }

    if let Some(max) = args.rand_sleep {
        random_sleep(Duration::from_secs(max));
    }
    if let Some(stall) = args.wait_for_network {
        let stall = stall.unwrap_or(Duration::from_secs(config.network.ping_timeout_secs));
        if !wait_for_network(stall, &config.network.ping_address) {
            warn!(
                "{} is unreachable after {}, running anyway",
                config.network.ping_address,
                humantime::format_duration(stall)
            );
        }
    }

    let mut options = RunOptions::from_config(config);
    options.ensure_run = args.ensure_run;
    options.verbose = ctx.verbose;
    options.hooks = args.hooks;
    options.force = args.force;
    if let Some(timeout) = args.timeout {
        options.timeout = Some(timeout);
    }
    if let Some(kill_timeout) = args.kill_timeout {
        options.kill_timeout = Some(kill_timeout);
    }

    let outcome = supervisor.run(&options)?;
    if outcome == RunOutcome::AlreadyRunning {
        info!("Updater supervisor is already running");
    }
    Ok(outcome.exit_code())
}

/// Start this binary again, detached, with the same arguments minus
/// `--background`.
fn spawn_detached() -> Result<()> {
    let exe = env::current_exe().context("failed to locate the svupd binary")?;
    let args = foreground_args(env::args_os().skip(1));
    let child = Command::new(&exe)
        .args(&args)
        .env("SVUPD_BACKGROUND", "0")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .process_group(0)
        .spawn()
        .with_context(|| format!("failed to start {} in the background", exe.display()))?;
    debug!(pid = child.id(), "Supervisor detached");
    Ok(())
}

fn foreground_args<I: IntoIterator<Item = OsString>>(args: I) -> Vec<OsString> {
    args.into_iter().filter(|arg| arg != "--background").collect()
}

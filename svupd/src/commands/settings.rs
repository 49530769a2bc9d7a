//! `svupd config`

use std::time::Duration;

use anyhow::{Result, bail};
use clap::{Subcommand, ValueEnum};
use serde::Serialize;

use super::Context;
use super::helpers::{humanize_duration, on_off};

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show updater settings
    Show,
    /// Enable or disable automatic updates
    Autorun { state: Toggle },
    /// Require approval before applying updates
    Approvals { state: Toggle },
    /// Grant approvals automatically after DUR, or `off`
    AutoGrant {
        #[arg(value_name = "DUR|off", value_parser = parse_window)]
        window: Window,
    },
    /// Select the update branch, or `default`
    Branch {
        #[arg(value_name = "NAME|default")]
        name: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Toggle {
    On,
    Off,
}

impl Toggle {
    fn enabled(self) -> bool {
        self == Toggle::On
    }
}

/// Parsed `auto-grant` argument; `None` turns automatic granting off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window(Option<Duration>);

fn parse_window(value: &str) -> std::result::Result<Window, String> {
    if value == "off" {
        return Ok(Window(None));
    }
    humantime::parse_duration(value)
        .map(|window| Window(Some(window)))
        .map_err(|err| err.to_string())
}

#[derive(Debug, Serialize)]
struct SettingsView {
    autorun: bool,
    approvals: bool,
    auto_grant_seconds: Option<u64>,
    branch: String,
}

pub fn config(ctx: &Context, action: ConfigCommand) -> Result<()> {
    let supervisor = ctx.supervisor();
    let settings = supervisor.settings();
    match action {
        ConfigCommand::Show => {
            let view = SettingsView {
                autorun: settings.enabled()?,
                approvals: settings.approvals_needed()?,
                auto_grant_seconds: settings.auto_grant_window()?.map(|w| w.as_secs()),
                branch: settings.branch()?,
            };
            if ctx.print_json(&view)? {
                return Ok(());
            }
            println!("Autorun:    {}", on_off(view.autorun));
            println!("Approvals:  {}", on_off(view.approvals));
            match view.auto_grant_seconds {
                Some(secs) => println!("Auto-grant: after {}", humanize_duration(secs)),
                None => println!("Auto-grant: off"),
            }
            println!("Branch:     {}", view.branch);
        }
        ConfigCommand::Autorun { state } => settings.set_enabled(state.enabled())?,
        ConfigCommand::Approvals { state } => settings.set_approvals_needed(state.enabled())?,
        ConfigCommand::AutoGrant { window } => {
            if window.0.is_some_and(|w| w.as_secs() == 0) {
                bail!("auto-grant window must be at least one second");
            }
            settings.set_auto_grant_window(window.0)?;
        }
        ConfigCommand::Branch { name } => {
            let branch = (name != "default").then_some(name.as_str());
            settings.set_branch(branch)?;
        }
    }
    Ok(())
}

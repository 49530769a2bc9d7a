//! `svupd lists` and `svupd l10n`

use anyhow::Result;
use clap::Subcommand;
use svupd_common::{l10n, lists};

use super::Context;

#[derive(Subcommand, Debug)]
pub enum ListsCommand {
    /// Show defined package lists and which are enabled
    Show,
    /// Enable exactly the given lists
    Set {
        #[arg(value_name = "NAME")]
        names: Vec<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum L10nCommand {
    /// Show supported languages and which are enabled
    Show,
    /// Enable exactly the given language codes
    Set {
        #[arg(value_name = "CODE")]
        codes: Vec<String>,
    },
}

pub fn lists(ctx: &Context, action: ListsCommand) -> Result<()> {
    let supervisor = ctx.supervisor();
    let definitions = &ctx.config.paths.userlists;
    match action {
        ListsCommand::Show => {
            let lists = lists::userlists(definitions, supervisor.settings())?;
            if ctx.print_json(&lists)? {
                return Ok(());
            }
            for (name, list) in lists.iter().filter(|(_, list)| !list.hidden) {
                let mark = if list.enabled { 'x' } else { ' ' };
                match &list.title {
                    Some(title) => println!("[{mark}] {name} - {title}"),
                    None => println!("[{mark}] {name}"),
                }
            }
        }
        ListsCommand::Set { names } => {
            lists::update_userlists(definitions, supervisor.settings(), &names)?;
        }
    }
    Ok(())
}

pub fn l10n(ctx: &Context, action: L10nCommand) -> Result<()> {
    let supervisor = ctx.supervisor();
    let supported = &ctx.config.paths.l10n;
    match action {
        L10nCommand::Show => {
            let languages = l10n::languages(supported, supervisor.settings())?;
            if ctx.print_json(&languages)? {
                return Ok(());
            }
            for (code, enabled) in &languages {
                let mark = if *enabled { 'x' } else { ' ' };
                println!("[{mark}] {code}");
            }
        }
        L10nCommand::Set { codes } => {
            l10n::update_languages(supported, supervisor.settings(), &codes)?;
        }
    }
    Ok(())
}

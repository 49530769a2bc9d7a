//! `svupd approvals`

use anyhow::Result;
use clap::Subcommand;
use svupd_common::notify::approval_notification;

use super::Context;
use super::helpers::{format_timestamp, indent_lines};

#[derive(Subcommand, Debug)]
pub enum ApprovalsCommand {
    /// Show the pending or last decided request
    Show,
    /// Grant the current plan
    Approve {
        /// Plan hash; refused if it is not the current plan's
        hash: Option<String>,
    },
    /// Refuse the current plan
    Deny {
        /// Plan hash; refused if it is not the current plan's
        hash: Option<String>,
    },
}

pub fn approvals(ctx: &Context, action: ApprovalsCommand) -> Result<()> {
    let gate = ctx.supervisor().approvals();
    match action {
        ApprovalsCommand::Show => {
            let request = gate.current()?;
            if ctx.print_json(&request)? {
                return Ok(());
            }
            match request {
                Some(request) => {
                    println!("Plan:   {}", request.hash);
                    println!("Status: {}", request.status);
                    println!("Since:  {}", format_timestamp(request.time));
                    let text = approval_notification(&request).message;
                    println!("{}", indent_lines(&text, "  "));
                }
                None => println!("No approval request"),
            }
        }
        ApprovalsCommand::Approve { hash } => {
            gate.approve(hash.as_deref())?;
            println!("Plan approved");
        }
        ApprovalsCommand::Deny { hash } => {
            gate.deny(hash.as_deref())?;
            println!("Plan denied");
        }
    }
    Ok(())
}

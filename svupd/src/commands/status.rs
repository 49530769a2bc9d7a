//! `svupd status`

use anyhow::Result;
use svupd_common::SupervisorStatus;

use super::Context;

pub fn status(ctx: &Context) -> Result<()> {
    let status = SupervisorStatus::probe(&ctx.config.paths)?;
    if ctx.print_json(&status)? {
        return Ok(());
    }

    match (status.running, status.pid) {
        (true, Some(pid)) => println!("Updater supervisor: running (pid {pid})"),
        (true, None) => println!("Updater supervisor: running"),
        (false, _) => println!("Updater supervisor: not running"),
    }
    println!(
        "Package manager lock: {}",
        if status.opkg_locked { "held" } else { "free" }
    );
    Ok(())
}

//! `svupd hook`

use anyhow::Result;
use svupd_common::{HookRegistration, SupervisorError};
use tracing::info;

use super::Context;

/// Register `commands`. Returns the exit code of the last command that ran
/// immediately, or 0 if they were all queued.
pub fn hook(ctx: &Context, commands: &[String]) -> Result<i32> {
    if let Some(bad) = commands.iter().find(|c| c.contains(['\n', '\r'])) {
        return Err(SupervisorError::InvalidHookCommand(bad.clone()).into());
    }

    let queue = ctx.supervisor().hooks();
    let mut code = 0;
    let mut queued = 0;
    for registration in queue.register_many(commands)? {
        match registration {
            HookRegistration::Queued => queued += 1,
            HookRegistration::RanImmediately(exit) => code = exit,
        }
    }
    if queued > 0 {
        info!("Queued {} hook(s) for the running supervisor", queued);
    }
    Ok(code)
}

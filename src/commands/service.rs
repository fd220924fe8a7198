//! Command: start, stop, or restart the mesh daemon.
use std::sync::Arc;

use anyhow::Result;

use super::CommandSetup;
use crate::cli::{GlobalOpts, ServiceOpts};
use crate::logging::{Log as _, Logger};
use crate::options::Assignments;
use crate::steps::daemon::{DAEMON, control_service};

/// Run the service command.
///
/// # Errors
///
/// Returns an error if settings cannot be read or `systemctl` fails.
pub fn run(global: &GlobalOpts, opts: &ServiceOpts, log: &Arc<Logger>) -> Result<()> {
    let setup = CommandSetup::init(global, log)?;
    let ctx = setup.step_context(
        setup.install_settings(&opts.privilege),
        Assignments::new(),
        log,
    );
    log.stage(&format!("{} {DAEMON}", capitalised(opts.action.verb())));
    control_service(&ctx, DAEMON, opts.action)?;
    Ok(())
}

fn capitalised(word: &str) -> String {
    let mut chars = word.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

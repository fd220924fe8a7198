//! Command: stop the daemon and remove its package and repository.
use std::sync::Arc;

use anyhow::{Context as _, Result};

use super::CommandSetup;
use crate::cli::{GlobalOpts, PrivilegeOpts};
use crate::logging::{Log as _, Logger};
use crate::options::Assignments;
use crate::sequencer::Sequencer;
use crate::steps::all_setup_steps;
use crate::steps::daemon::{DAEMON, remove_daemon};

/// Run the remove command.
///
/// The daemon's configuration files and the boot config are left in place.
/// Every recorded step is reset so a later `install` starts over.
///
/// # Errors
///
/// Returns an error if settings cannot be read, a system command fails, or
/// the step record cannot be written.
pub fn run(global: &GlobalOpts, opts: &PrivilegeOpts, log: &Arc<Logger>) -> Result<()> {
    let setup = CommandSetup::init(global, log)?;
    let ctx = setup.step_context(setup.install_settings(opts), Assignments::new(), log);
    log.stage(&format!("Removing {DAEMON}"));
    remove_daemon(&ctx)?;
    if setup.dry_run {
        log.dry_run("would reset the step record");
    } else {
        reset_record(&setup)?;
        log.info("step record reset; `meshnode install` starts from the beginning");
    }
    Ok(())
}

/// Mark every step pending again, keeping a pending reboot.
fn reset_record(setup: &CommandSetup) -> Result<()> {
    let mut seq = Sequencer::open(
        all_setup_steps(setup.settings.install.open_editor),
        &setup.settings.paths.state_file,
    )
    .context("opening the step record")?;
    let reboot = seq.reboot_required();
    seq.reset()?;
    if reboot {
        seq.set_reboot_required(true)?;
    }
    Ok(())
}

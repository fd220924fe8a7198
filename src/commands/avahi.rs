//! Command: turn the node's mDNS advertisement on or off.
use std::sync::Arc;

use anyhow::Result;

use super::CommandSetup;
use crate::cli::{AvahiAction, AvahiOpts, GlobalOpts};
use crate::logging::{Log as _, Logger};
use crate::options::Assignments;
use crate::sequencer::{Step as _, StepResult};
use crate::steps::avahi::{ConfigureAvahi, disable_avahi};

/// Run the avahi command.
///
/// # Errors
///
/// Returns an error if settings cannot be read or a system command fails.
pub fn run(global: &GlobalOpts, opts: &AvahiOpts, log: &Arc<Logger>) -> Result<()> {
    let setup = CommandSetup::init(global, log)?;
    let ctx = setup.step_context(
        setup.install_settings(&opts.privilege),
        Assignments::new(),
        log,
    );
    match opts.action {
        AvahiAction::Enable => {
            log.stage("Advertising the node over mDNS");
            match ConfigureAvahi.run(&ctx)? {
                StepResult::AlreadyDone(reason) => log.info(&reason),
                StepResult::Ok | StepResult::DryRun => {}
                StepResult::RebootRequired => log.warn("reboot to finish enabling Avahi"),
            }
        }
        AvahiAction::Disable => {
            log.stage("Disabling Avahi");
            disable_avahi(&ctx)?;
        }
    }
    Ok(())
}

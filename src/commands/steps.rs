//! Command: inspect or change the persisted step record.
use std::fmt::Write as _;

use anyhow::{Context as _, Result};

use crate::cli::{GlobalOpts, StepsAction, StepsOpts};
use crate::config::Settings;
use crate::logging::{Log as _, Logger};
use crate::sequencer::Sequencer;
use crate::steps::all_setup_steps;

/// Run the steps command.
///
/// # Errors
///
/// Returns an error if the record cannot be read or written, or a retried
/// step is unknown or not failed.
pub fn run(global: &GlobalOpts, opts: &StepsOpts, log: &Logger) -> Result<()> {
    let settings = Settings::load(global.settings.as_deref()).context("loading settings")?;
    let state_file = global
        .state_file
        .clone()
        .unwrap_or(settings.paths.state_file);
    let mut seq = Sequencer::open(all_setup_steps(true), &state_file)
        .context("opening the step record")?;
    if global.dry_run {
        seq = seq.dry_run();
    }

    match opts.action.clone().unwrap_or(StepsAction::Show) {
        StepsAction::Show => print!("{}", render(&seq)),
        StepsAction::Retry { name } => {
            seq.retry(&name)?;
            log.info(&format!("'{name}' will run again on the next install"));
        }
        StepsAction::Reset => {
            seq.reset()?;
            log.info("every step is pending again");
        }
    }
    Ok(())
}

fn render(seq: &Sequencer) -> String {
    let mut out = String::new();
    for entry in seq.entries() {
        let when = entry
            .updated_at
            .map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string());
        let _ = write!(
            out,
            "{:<8} {:<24} {when}",
            entry.state.to_string(),
            entry.name
        );
        if let Some(message) = &entry.message {
            let _ = write!(out, "  {message}");
        }
        out.push('\n');
    }
    if seq.reboot_required() {
        out.push_str("reboot required\n");
    }
    out
}

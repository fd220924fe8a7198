//! Command: merge the selection into both configuration files.
use anyhow::{Context as _, Result};

use super::CommandSetup;
use crate::cli::{GlobalOpts, SelectionOpts};
use crate::error::ConflictReport;
use crate::logging::{Log as _, Logger};
use crate::options::{Assignments, OptionModel};
use crate::sequencer::Sequencer;
use crate::steps::apply::{ApplyReport, apply_artifact};
use crate::steps::all_setup_steps;
use crate::store::{ArtifactId, BootConfigDocument, ServiceYamlDocument};

/// Run the apply command.
///
/// # Errors
///
/// Returns an error if the selection is invalid, a file cannot be loaded or
/// committed, or any key could not be applied.
pub fn run(global: &GlobalOpts, opts: &SelectionOpts, log: &Logger) -> Result<()> {
    let setup = CommandSetup::init(global, log)?;
    log.stage("Building selection");
    let selection = setup.build_selection(opts, log)?;
    let reports = apply_selection(&setup, &selection, log)?;
    finish(&reports)
}

/// Reconcile and commit both artifacts, logging what happened to each.
///
/// Both artifacts are processed even when the first has conflicts.
///
/// # Errors
///
/// Returns an error if a file cannot be loaded or committed.
pub fn apply_selection(
    setup: &CommandSetup,
    selection: &Assignments,
    log: &Logger,
) -> Result<Vec<ApplyReport>> {
    let store = setup.store();
    let model = OptionModel::builtin();
    let mut reports = Vec::with_capacity(ArtifactId::ALL.len());
    for id in ArtifactId::ALL {
        log.stage(&format!("Applying {id}"));
        let report = match id {
            ArtifactId::BootConfig => {
                apply_artifact::<BootConfigDocument>(&store, model, selection, setup.dry_run)
            }
            ArtifactId::ServiceYaml => {
                apply_artifact::<ServiceYamlDocument>(&store, model, selection, setup.dry_run)
            }
        }
        .with_context(|| format!("applying {id}"))?;
        describe(&report, setup.dry_run, log);
        reports.push(report);
    }

    if reports
        .iter()
        .any(|r| r.artifact == ArtifactId::BootConfig && r.committed())
    {
        log.warn("boot config changed; reboot to apply");
        flag_reboot(setup, log);
    }
    Ok(reports)
}

fn describe(report: &ApplyReport, dry_run: bool, log: &Logger) {
    let path = report.path.display();
    if !report.changed {
        log.info(&format!("{path} already up to date"));
    } else if dry_run {
        log.dry_run(&format!(
            "would update {path}: {}",
            report.applied.join(", ")
        ));
    } else {
        log.info(&format!("updated {path}"));
    }
    if report.dropped_duplicates > 0 {
        log.info(&format!(
            "removed {} duplicate line(s)",
            report.dropped_duplicates
        ));
    }
    for conflict in &report.conflicts {
        log.error(&conflict.to_string());
    }
}

/// Persist the reboot flag in the step record so `status` keeps showing it.
///
/// The record is opened with the same step set `install` uses, so the flag
/// never adds entries for steps that install would not run.
fn flag_reboot(setup: &CommandSetup, log: &Logger) {
    let path = &setup.settings.paths.state_file;
    let steps = all_setup_steps(setup.settings.install.open_editor);
    let result = Sequencer::open(steps, path)
        .and_then(|mut seq| seq.set_reboot_required(true));
    if let Err(e) = result {
        log.warn(&format!("could not record the pending reboot: {e}"));
    }
}

/// Fail when any report has conflicts.
fn finish(reports: &[ApplyReport]) -> Result<()> {
    let conflicts: Vec<_> = reports
        .iter()
        .flat_map(|r| r.conflicts.iter().cloned())
        .collect();
    if conflicts.is_empty() {
        Ok(())
    } else {
        Err(ConflictReport(conflicts).into())
    }
}

//! Reconcile the selection into the boot config and the daemon YAML.
use std::path::PathBuf;

use anyhow::{Context as _, Result};

use super::StepContext;
use super::daemon::InstallDaemon;
use crate::error::{Conflict, ConflictReport, StoreError};
use crate::options::{Assignments, OptionModel};
use crate::reconcile::{Mergeable, Reconciler};
use crate::sequencer::{Step, StepResult, step_deps};
use crate::store::{ArtifactId, ArtifactStore, BootConfigDocument, CommitOutcome, ServiceYamlDocument};

/// What one artifact apply did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    /// The artifact that was reconciled.
    pub artifact: ArtifactId,
    /// Its path on disk.
    pub path: PathBuf,
    /// Keys merged into the document.
    pub applied: Vec<String>,
    /// Duplicate managed lines removed.
    pub dropped_duplicates: usize,
    /// Keys that could not be applied.
    pub conflicts: Vec<Conflict>,
    /// Whether the merged document differs from the file.
    pub changed: bool,
    /// `None` in dry-run mode or when nothing changed.
    pub outcome: Option<CommitOutcome>,
}

impl ApplyReport {
    /// Whether the file on disk was replaced.
    #[must_use]
    pub const fn committed(&self) -> bool {
        matches!(self.outcome, Some(CommitOutcome::Committed { .. }))
    }

    /// The conflicts as an error value, if there were any.
    #[must_use]
    pub fn conflict_report(&self) -> Option<ConflictReport> {
        (!self.conflicts.is_empty()).then(|| ConflictReport(self.conflicts.clone()))
    }
}

/// Load artifact `D`, merge the keys of `desired` it owns, and commit the
/// result unless `dry_run` is set or nothing changed.
///
/// Keys owned by the other artifact are ignored here. The merge is
/// committed even when some keys conflict, so the applicable part of the
/// selection is never lost; callers decide how to surface the conflicts.
///
/// # Errors
///
/// Returns the store error if the file cannot be loaded or committed,
/// including [`StoreError::StaleRead`] when it changed during the merge.
pub fn apply_artifact<D: Mergeable>(
    store: &ArtifactStore,
    model: OptionModel,
    desired: &Assignments,
    dry_run: bool,
) -> Result<ApplyReport, StoreError> {
    let split = model.split_by_artifact(desired);
    let owned = match D::ID {
        ArtifactId::BootConfig => split.boot,
        ArtifactId::ServiceYaml => split.service,
    };

    let snapshot = store.load_or_template::<D>()?;
    let rec = snapshot
        .document
        .reconcile(&Reconciler::new(model), &owned);

    let outcome = if rec.changed && !dry_run {
        Some(store.commit(&snapshot.fingerprint, &rec.document)?)
    } else {
        None
    };

    Ok(ApplyReport {
        artifact: D::ID,
        path: store.path(D::ID).to_path_buf(),
        applied: rec.applied,
        dropped_duplicates: rec.dropped_duplicates,
        conflicts: rec.conflicts,
        changed: rec.changed,
        outcome,
    })
}

/// Shared body of the two apply steps.
fn run_apply<D: Mergeable>(ctx: &StepContext) -> Result<(ApplyReport, Option<StepResult>)> {
    let report = apply_artifact::<D>(
        &ctx.store,
        OptionModel::builtin(),
        &ctx.selection,
        ctx.dry_run,
    )
    .with_context(|| format!("applying {}", D::ID))?;

    if let Some(CommitOutcome::Committed {
        backup: Some(backup),
        ..
    }) = &report.outcome
    {
        ctx.log
            .debug(&format!("previous {} saved to {}", D::ID, backup.display()));
    }
    if report.dropped_duplicates > 0 {
        ctx.log.info(&format!(
            "removed {} duplicate line(s) from {}",
            report.dropped_duplicates,
            report.path.display()
        ));
    }
    if let Some(conflicts) = report.conflict_report() {
        return Err(anyhow::Error::new(conflicts)
            .context(format!("{} only partially applied", D::ID)));
    }

    let early = if !report.changed {
        Some(StepResult::AlreadyDone(format!("{} already up to date", D::ID)))
    } else if ctx.dry_run {
        ctx.log.dry_run(&format!(
            "would update {} ({})",
            report.path.display(),
            report.applied.join(", ")
        ));
        Some(StepResult::DryRun)
    } else {
        None
    };
    Ok((report, early))
}

/// Merge the boot-time keys into `config.txt`.
#[derive(Debug)]
pub struct ApplyBootConfig;

impl Step for ApplyBootConfig {
    fn name(&self) -> &str {
        "Apply boot config"
    }

    fn run(&self, ctx: &StepContext) -> Result<StepResult> {
        let (report, early) = run_apply::<BootConfigDocument>(ctx)?;
        if let Some(result) = early {
            return Ok(result);
        }
        ctx.log.info(&format!(
            "updated {}; reboot to apply",
            report.path.display()
        ));
        Ok(StepResult::RebootRequired)
    }
}

/// Merge the daemon keys into `config.yaml`.
///
/// The daemon package creates the configuration directory, so this runs
/// after it is installed.
#[derive(Debug)]
pub struct ApplyServiceConfig;

impl Step for ApplyServiceConfig {
    fn name(&self) -> &str {
        "Apply service config"
    }

    step_deps![InstallDaemon];

    fn run(&self, ctx: &StepContext) -> Result<StepResult> {
        let (report, early) = run_apply::<ServiceYamlDocument>(ctx)?;
        if let Some(result) = early {
            return Ok(result);
        }
        ctx.log.info(&format!("updated {}", report.path.display()));
        Ok(StepResult::Ok)
    }
}

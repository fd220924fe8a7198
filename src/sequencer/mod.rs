//! Resumable, dependency-ordered setup steps.
//!
//! The [`Sequencer`] owns the persisted [`StepRecord`] and is the only code
//! that changes it. Every transition is written to disk before the call
//! returns, so a crash at any point leaves a record the next run can resume
//! from.
pub mod graph;
pub mod record;

pub use record::{StepEntry, StepRecord, StepState};

use std::any::TypeId;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;

use crate::error::SequencerError;
use crate::logging::StepStatus;
use crate::steps::StepContext;

/// Implement [`Step::dependencies`] by expanding to the required
/// `fn dependencies(&self) -> &[TypeId]` method body.
///
/// The `const DEPS` intermediate gives the slice the `'static` lifetime the
/// return type needs.
///
/// # Examples
///
/// ```ignore
/// step_deps![super::daemon::InstallDaemon, super::apply::ApplyServiceConfig]
/// ```
macro_rules! step_deps {
    [$($dep:ty),+ $(,)?] => {
        fn dependencies(&self) -> &[std::any::TypeId] {
            const DEPS: &[std::any::TypeId] = &[$(std::any::TypeId::of::<$dep>()),+];
            DEPS
        }
    };
}

pub(crate) use step_deps;

/// Message recorded for a display-dependent step on a headless node.
pub const UNSUPPORTED_HEADLESS: &str = "unsupported: requires an interactive display session";

/// A named unit of setup work.
///
/// The `'static` bound gives each step struct a stable [`TypeId`], which is
/// how dependencies are declared (see [`Step::dependencies`]).
pub trait Step: Send + Sync + 'static {
    /// Human-readable step name; also the key in the step record.
    fn name(&self) -> &str;

    /// The concrete `TypeId` of this step, used as a dependency identifier.
    fn step_id(&self) -> TypeId {
        TypeId::of::<Self>()
    }

    /// Steps that must be `done` before this one may start.
    fn dependencies(&self) -> &[TypeId] {
        &[]
    }

    /// Whether the step needs an interactive display session.
    fn requires_display(&self) -> bool {
        false
    }

    /// Execute the step.
    ///
    /// # Errors
    ///
    /// Returns an error when the work could not be completed; the sequencer
    /// records the step as `failed` with the error chain as its message.
    fn run(&self, ctx: &StepContext) -> Result<StepResult>;
}

/// What a successful step run reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepResult {
    /// The work was done.
    Ok,
    /// The work was done and takes effect only after a reboot.
    RebootRequired,
    /// Nothing needed doing.
    AlreadyDone(String),
    /// Dry run; nothing was changed.
    DryRun,
}

/// Final outcome passed to [`Sequencer::mark_result`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The step finished successfully.
    Done,
    /// The step failed with this message.
    Failed(String),
}

/// Totals of one [`Sequencer::run_to_completion`] call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Steps that reached `done` during this run.
    pub completed: Vec<String>,
    /// Steps that reached `failed` during this run.
    pub failed: Vec<String>,
    /// Steps left `pending` behind a failed dependency.
    pub blocked: Vec<String>,
    /// The operator interrupted the run between steps.
    pub aborted: bool,
    /// The record's reboot flag after the run.
    pub reboot_required: bool,
}

impl RunReport {
    /// Turn a run with failures into [`SequencerError::StepFailed`].
    ///
    /// # Errors
    ///
    /// Returns [`SequencerError::StepFailed`] naming every failed step.
    pub fn into_result(self) -> Result<Self, SequencerError> {
        if self.failed.is_empty() {
            Ok(self)
        } else {
            Err(SequencerError::StepFailed { steps: self.failed })
        }
    }
}

/// Drives the declared steps through `pending → running → done | failed`.
pub struct Sequencer {
    steps: Vec<Box<dyn Step>>,
    record: StepRecord,
    path: PathBuf,
    persist: bool,
}

impl std::fmt::Debug for Sequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sequencer")
            .field("steps", &self.steps.iter().map(|s| s.name()).collect::<Vec<_>>())
            .field("record", &self.record)
            .field("path", &self.path)
            .field("persist", &self.persist)
            .finish()
    }
}

impl Sequencer {
    /// Validate the step graph and load the record at `path`.
    ///
    /// # Errors
    ///
    /// Returns a graph validation error, or [`SequencerError::Record`] when
    /// the record exists but cannot be read.
    pub fn open(steps: Vec<Box<dyn Step>>, path: &Path) -> Result<Self, SequencerError> {
        let refs: Vec<&dyn Step> = steps.iter().map(Box::as_ref).collect();
        graph::validate(&refs)?;
        let names: Vec<&str> = refs.iter().map(|s| s.name()).collect();
        let record = StepRecord::load(path)?.aligned(&names);
        Ok(Self {
            steps,
            record,
            path: path.to_path_buf(),
            persist: true,
        })
    }

    /// Keep every transition in memory only.
    #[must_use]
    pub fn dry_run(mut self) -> Self {
        self.persist = false;
        self
    }

    /// Declared steps, in order.
    pub fn steps(&self) -> impl Iterator<Item = &dyn Step> {
        self.steps.iter().map(Box::as_ref)
    }

    /// Persisted entries, in declared order.
    #[must_use]
    pub fn entries(&self) -> &[StepEntry] {
        &self.record.steps
    }

    /// Current state of `name`, if declared.
    #[must_use]
    pub fn state(&self, name: &str) -> Option<StepState> {
        self.record.entry(name).map(|e| e.state)
    }

    /// Whether a committed boot change still awaits a reboot.
    #[must_use]
    pub const fn reboot_required(&self) -> bool {
        self.record.reboot_required
    }

    /// Record that a reboot is (or is no longer) needed.
    ///
    /// # Errors
    ///
    /// Returns [`SequencerError::Record`] if the record cannot be written.
    pub fn set_reboot_required(&mut self, required: bool) -> Result<(), SequencerError> {
        self.record.reboot_required = required;
        self.save()
    }

    /// First step in declared order that is `pending` with every
    /// dependency `done`.
    #[must_use]
    pub fn next_eligible_step(&self) -> Option<&dyn Step> {
        self.next_eligible_index()
            .and_then(|i| self.steps.get(i))
            .map(Box::as_ref)
    }

    /// Move `name` from `pending` to `running`.
    ///
    /// # Errors
    ///
    /// Returns [`SequencerError::UnknownStep`], or
    /// [`SequencerError::NotEligible`] when the step is not pending or a
    /// dependency is not done.
    pub fn start(&mut self, name: &str) -> Result<(), SequencerError> {
        let idx = self.index_of(name)?;
        let state = self.state(name).unwrap_or_default();
        if state != StepState::Pending {
            return Err(not_eligible(name, format!("it is {state}")));
        }
        if let Some(dep) = self.steps.get(idx).and_then(|s| self.unfinished_dependency(s.as_ref())) {
            return Err(not_eligible(name, format!("'{dep}' is not done")));
        }
        self.transition(name, StepState::Running, None)
    }

    /// Record the outcome of a `running` step.
    ///
    /// # Errors
    ///
    /// Returns [`SequencerError::UnknownStep`], or
    /// [`SequencerError::NotEligible`] when the step is not running.
    pub fn mark_result(&mut self, name: &str, outcome: StepOutcome) -> Result<(), SequencerError> {
        self.index_of(name)?;
        let state = self.state(name).unwrap_or_default();
        if state != StepState::Running {
            return Err(not_eligible(name, format!("it is {state}, not running")));
        }
        match outcome {
            StepOutcome::Done => self.transition(name, StepState::Done, None),
            StepOutcome::Failed(message) => self.transition(name, StepState::Failed, Some(message)),
        }
    }

    /// Put a `failed` step back to `pending` so the next run retries it.
    ///
    /// # Errors
    ///
    /// Returns [`SequencerError::UnknownStep`], or
    /// [`SequencerError::NotEligible`] when the step has not failed.
    pub fn retry(&mut self, name: &str) -> Result<(), SequencerError> {
        self.index_of(name)?;
        let state = self.state(name).unwrap_or_default();
        if state != StepState::Failed {
            return Err(not_eligible(name, format!("only failed steps can be retried; it is {state}")));
        }
        self.transition(name, StepState::Pending, None)
    }

    /// Forget all progress: every step back to `pending`, reboot flag off.
    ///
    /// # Errors
    ///
    /// Returns [`SequencerError::Record`] if the record cannot be written.
    pub fn reset(&mut self) -> Result<(), SequencerError> {
        for entry in &mut self.record.steps {
            entry.transition(StepState::Pending, None);
        }
        self.record.reboot_required = false;
        self.save()
    }

    /// Run eligible steps one at a time until none is left or `abort` is set.
    ///
    /// `abort` is checked before each step; a step that has started is never
    /// interrupted. Every step's status is recorded in `ctx.log` in declared
    /// order once the loop ends.
    ///
    /// # Errors
    ///
    /// Returns [`SequencerError::Record`] if the record cannot be written.
    /// Failed steps are not an error here; see [`RunReport::into_result`].
    pub fn run_to_completion(
        &mut self,
        ctx: &StepContext,
        abort: &AtomicBool,
    ) -> Result<RunReport, SequencerError> {
        let mut report = RunReport::default();
        let mut outcomes: HashMap<String, (StepStatus, Option<String>)> = HashMap::new();

        loop {
            if abort.load(Ordering::SeqCst) {
                ctx.log.warn("interrupted; remaining steps stay pending");
                report.aborted = true;
                break;
            }
            let Some(idx) = self.next_eligible_index() else {
                break;
            };
            let Some((name, needs_display)) = self
                .steps
                .get(idx)
                .map(|s| (s.name().to_string(), s.requires_display()))
            else {
                break;
            };

            ctx.log.stage(&name);
            self.start(&name)?;

            if needs_display && !ctx.display_available {
                ctx.log.warn(&format!("{name}: {UNSUPPORTED_HEADLESS}"));
                self.mark_result(&name, StepOutcome::Failed(UNSUPPORTED_HEADLESS.to_string()))?;
                outcomes.insert(name.clone(), (StepStatus::Unsupported, None));
                report.failed.push(name);
                continue;
            }

            let result = match self.steps.get(idx) {
                Some(step) => step.run(ctx),
                None => break,
            };
            match result {
                Ok(result) => {
                    self.mark_result(&name, StepOutcome::Done)?;
                    let entry = match result {
                        StepResult::Ok => (StepStatus::Done, None),
                        StepResult::RebootRequired => {
                            self.set_reboot_required(true)?;
                            (StepStatus::Done, Some("reboot required".to_string()))
                        }
                        StepResult::AlreadyDone(reason) => (StepStatus::AlreadyDone, Some(reason)),
                        StepResult::DryRun => (StepStatus::DryRun, None),
                    };
                    outcomes.insert(name.clone(), entry);
                    report.completed.push(name);
                }
                Err(e) => {
                    let message = format!("{e:#}");
                    ctx.log.error(&format!("{name}: {message}"));
                    self.mark_result(&name, StepOutcome::Failed(message.clone()))?;
                    outcomes.insert(name.clone(), (StepStatus::Failed, Some(message)));
                    report.failed.push(name);
                }
            }
        }

        for entry in &self.record.steps {
            let (status, message) = outcomes.remove(&entry.name).unwrap_or_else(|| match entry.state {
                StepState::Done => (StepStatus::AlreadyDone, Some("completed in an earlier run".to_string())),
                StepState::Failed => (StepStatus::Failed, entry.message.clone()),
                StepState::Pending | StepState::Running if report.aborted => {
                    (StepStatus::Blocked, Some("not started".to_string()))
                }
                StepState::Pending | StepState::Running => {
                    (StepStatus::Blocked, Some("waiting on a failed step".to_string()))
                }
            });
            if status == StepStatus::Blocked && !report.aborted {
                report.blocked.push(entry.name.clone());
            }
            ctx.log.record_step(&entry.name, status, message.as_deref());
        }

        report.reboot_required = self.record.reboot_required;
        Ok(report)
    }

    fn next_eligible_index(&self) -> Option<usize> {
        self.steps.iter().position(|step| {
            self.state(step.name()) == Some(StepState::Pending)
                && self.unfinished_dependency(step.as_ref()).is_none()
        })
    }

    /// Name of the first dependency of `step` that is not `done`.
    fn unfinished_dependency(&self, step: &dyn Step) -> Option<&str> {
        step.dependencies().iter().find_map(|dep| {
            self.steps
                .iter()
                .find(|s| s.step_id() == *dep)
                .map(|s| s.name())
                .filter(|name| self.state(name) != Some(StepState::Done))
        })
    }

    fn index_of(&self, name: &str) -> Result<usize, SequencerError> {
        self.steps
            .iter()
            .position(|s| s.name() == name)
            .ok_or_else(|| SequencerError::UnknownStep(name.to_string()))
    }

    fn transition(
        &mut self,
        name: &str,
        state: StepState,
        message: Option<String>,
    ) -> Result<(), SequencerError> {
        let entry = self
            .record
            .entry_mut(name)
            .ok_or_else(|| SequencerError::UnknownStep(name.to_string()))?;
        entry.transition(state, message);
        tracing::debug!("step '{name}' -> {state}");
        self.save()
    }

    fn save(&self) -> Result<(), SequencerError> {
        if self.persist {
            self.record.save(&self.path)?;
        }
        Ok(())
    }
}

fn not_eligible(step: &str, reason: String) -> SequencerError {
    SequencerError::NotEligible {
        step: step.to_string(),
        reason,
    }
}

#[cfg(test)]
#[allow(
    clippy::expect_used,
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    use crate::steps::test_helpers::{TestContext, make_context};

    /// Step whose behaviour is scripted per test.
    struct Scripted {
        name: &'static str,
        display: bool,
        fail: bool,
        result: StepResult,
        runs: Arc<AtomicUsize>,
    }

    impl Scripted {
        fn ok(name: &'static str) -> Self {
            Self {
                name,
                display: false,
                fail: false,
                result: StepResult::Ok,
                runs: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    macro_rules! scripted_step {
        ($ty:ident) => {
            struct $ty(Scripted);
            impl Step for $ty {
                fn name(&self) -> &str {
                    self.0.name
                }
                fn run(&self, _ctx: &StepContext) -> Result<StepResult> {
                    self.0.runs.fetch_add(1, Ordering::SeqCst);
                    if self.0.fail {
                        anyhow::bail!("{} broke", self.0.name);
                    }
                    Ok(self.0.result.clone())
                }
                fn requires_display(&self) -> bool {
                    self.0.display
                }
            }
        };
        ($ty:ident, $($dep:ty),+) => {
            struct $ty(Scripted);
            impl Step for $ty {
                fn name(&self) -> &str {
                    self.0.name
                }
                step_deps![$($dep),+];
                fn run(&self, _ctx: &StepContext) -> Result<StepResult> {
                    self.0.runs.fetch_add(1, Ordering::SeqCst);
                    if self.0.fail {
                        anyhow::bail!("{} broke", self.0.name);
                    }
                    Ok(self.0.result.clone())
                }
                fn requires_display(&self) -> bool {
                    self.0.display
                }
            }
        };
    }

    scripted_step!(First);
    scripted_step!(Second, First);
    scripted_step!(Third, Second);
    scripted_step!(Side);

    fn chain(second_fails: bool) -> (Vec<Box<dyn Step>>, [Arc<AtomicUsize>; 3]) {
        let first = Scripted::ok("first");
        let mut second = Scripted::ok("second");
        second.fail = second_fails;
        let third = Scripted::ok("third");
        let counters = [
            Arc::clone(&first.runs),
            Arc::clone(&second.runs),
            Arc::clone(&third.runs),
        ];
        let steps: Vec<Box<dyn Step>> = vec![
            Box::new(First(first)),
            Box::new(Second(second)),
            Box::new(Third(third)),
        ];
        (steps, counters)
    }

    fn runs(counter: &Arc<AtomicUsize>) -> usize {
        counter.load(Ordering::SeqCst)
    }

    #[test]
    fn next_eligible_follows_dependencies() {
        let dir = tempfile::tempdir().unwrap();
        let (steps, _) = chain(false);
        let mut seq = Sequencer::open(steps, &dir.path().join("steps.json")).unwrap();
        assert_eq!(seq.next_eligible_step().unwrap().name(), "first");
        seq.start("first").unwrap();
        assert!(seq.next_eligible_step().is_none(), "second waits on running first");
        seq.mark_result("first", StepOutcome::Done).unwrap();
        assert_eq!(seq.next_eligible_step().unwrap().name(), "second");
    }

    #[test]
    fn start_rejects_unfinished_dependency() {
        let dir = tempfile::tempdir().unwrap();
        let (steps, _) = chain(false);
        let mut seq = Sequencer::open(steps, &dir.path().join("steps.json")).unwrap();
        let err = seq.start("second").unwrap_err();
        assert!(matches!(err, SequencerError::NotEligible { ref step, .. } if step == "second"));
        assert!(err.to_string().contains("'first' is not done"));
    }

    #[test]
    fn unknown_step_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (steps, _) = chain(false);
        let mut seq = Sequencer::open(steps, &dir.path().join("steps.json")).unwrap();
        assert!(matches!(
            seq.start("nope"),
            Err(SequencerError::UnknownStep(name)) if name == "nope"
        ));
    }

    #[test]
    fn mark_result_requires_running() {
        let dir = tempfile::tempdir().unwrap();
        let (steps, _) = chain(false);
        let mut seq = Sequencer::open(steps, &dir.path().join("steps.json")).unwrap();
        assert!(matches!(
            seq.mark_result("first", StepOutcome::Done),
            Err(SequencerError::NotEligible { .. })
        ));
    }

    #[test]
    fn transitions_are_persisted_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("steps.json");
        let (steps, _) = chain(false);
        let mut seq = Sequencer::open(steps, &path).unwrap();
        seq.start("first").unwrap();
        let on_disk = StepRecord::load(&path).unwrap();
        assert_eq!(on_disk.entry("first").unwrap().state, StepState::Running);
    }

    #[test]
    fn retry_only_from_failed() {
        let dir = tempfile::tempdir().unwrap();
        let (steps, _) = chain(false);
        let mut seq = Sequencer::open(steps, &dir.path().join("steps.json")).unwrap();
        assert!(seq.retry("first").is_err());
        seq.start("first").unwrap();
        seq.mark_result("first", StepOutcome::Failed("boom".to_string()))
            .unwrap();
        assert_eq!(seq.entries()[0].message.as_deref(), Some("boom"));
        seq.retry("first").unwrap();
        assert_eq!(seq.state("first"), Some(StepState::Pending));
        assert_eq!(seq.entries()[0].message, None);
    }

    #[test]
    fn run_to_completion_runs_in_dependency_order() {
        let dir = tempfile::tempdir().unwrap();
        let TestContext { ctx, log, .. } = make_context(dir.path());
        let (steps, counters) = chain(false);
        let mut seq = Sequencer::open(steps, &dir.path().join("steps.json")).unwrap();
        let report = seq
            .run_to_completion(&ctx, &AtomicBool::new(false))
            .unwrap();
        assert_eq!(report.completed, ["first", "second", "third"]);
        assert!(report.failed.is_empty() && report.blocked.is_empty());
        assert!(counters.iter().all(|c| runs(c) == 1));
        assert_eq!(log.failure_count(), 0);
    }

    #[test]
    fn failure_blocks_dependents_and_resume_skips_done_steps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("steps.json");
        let TestContext { ctx, .. } = make_context(dir.path());

        let (steps, counters) = chain(true);
        let mut seq = Sequencer::open(steps, &path).unwrap();
        let report = seq
            .run_to_completion(&ctx, &AtomicBool::new(false))
            .unwrap();
        assert_eq!(report.completed, ["first"]);
        assert_eq!(report.failed, ["second"]);
        assert_eq!(report.blocked, ["third"]);
        assert_eq!(runs(&counters[2]), 0);
        assert!(matches!(
            report.into_result(),
            Err(SequencerError::StepFailed { steps }) if steps == ["second"]
        ));

        // A fresh process: the failed step stays failed until retried.
        let (steps, counters) = chain(false);
        let mut seq = Sequencer::open(steps, &path).unwrap();
        assert_eq!(seq.state("first"), Some(StepState::Done));
        assert_eq!(seq.state("second"), Some(StepState::Failed));
        assert!(seq.next_eligible_step().is_none());

        seq.retry("second").unwrap();
        let report = seq
            .run_to_completion(&ctx, &AtomicBool::new(false))
            .unwrap();
        assert_eq!(report.completed, ["second", "third"]);
        assert_eq!(runs(&counters[0]), 0, "done steps never run again");
    }

    #[test]
    fn interrupted_step_reruns_after_crash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("steps.json");
        let (steps, _) = chain(false);
        let mut seq = Sequencer::open(steps, &path).unwrap();
        seq.start("first").unwrap();
        drop(seq);

        let (steps, counters) = chain(false);
        let mut seq = Sequencer::open(steps, &path).unwrap();
        assert_eq!(seq.state("first"), Some(StepState::Pending));
        let TestContext { ctx, .. } = make_context(dir.path());
        seq.run_to_completion(&ctx, &AtomicBool::new(false))
            .unwrap();
        assert_eq!(runs(&counters[0]), 1);
    }

    #[test]
    fn abort_flag_stops_before_next_step() {
        let dir = tempfile::tempdir().unwrap();
        let TestContext { ctx, .. } = make_context(dir.path());
        let (steps, counters) = chain(false);
        let mut seq = Sequencer::open(steps, &dir.path().join("steps.json")).unwrap();
        let report = seq.run_to_completion(&ctx, &AtomicBool::new(true)).unwrap();
        assert!(report.aborted);
        assert!(report.completed.is_empty() && report.blocked.is_empty());
        assert_eq!(runs(&counters[0]), 0);
        assert_eq!(seq.state("first"), Some(StepState::Pending));
    }

    #[test]
    fn display_step_fails_as_unsupported_when_headless() {
        let dir = tempfile::tempdir().unwrap();
        let TestContext { ctx, .. } = make_context(dir.path());
        let mut side = Scripted::ok("editor");
        side.display = true;
        let counter = Arc::clone(&side.runs);
        let mut seq =
            Sequencer::open(vec![Box::new(Side(side))], &dir.path().join("steps.json")).unwrap();
        let report = seq
            .run_to_completion(&ctx, &AtomicBool::new(false))
            .unwrap();
        assert_eq!(report.failed, ["editor"]);
        assert_eq!(runs(&counter), 0);
        assert_eq!(
            seq.entries()[0].message.as_deref(),
            Some(UNSUPPORTED_HEADLESS)
        );
    }

    #[test]
    fn reboot_required_result_sets_flag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("steps.json");
        let TestContext { ctx, .. } = make_context(dir.path());
        let mut side = Scripted::ok("boot");
        side.result = StepResult::RebootRequired;
        let mut seq = Sequencer::open(vec![Box::new(Side(side))], &path).unwrap();
        let report = seq
            .run_to_completion(&ctx, &AtomicBool::new(false))
            .unwrap();
        assert!(report.reboot_required);
        assert!(StepRecord::load(&path).unwrap().reboot_required);
    }

    #[test]
    fn dry_run_never_writes_the_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("steps.json");
        let TestContext { ctx, .. } = make_context(dir.path());
        let (steps, _) = chain(false);
        let mut seq = Sequencer::open(steps, &path).unwrap().dry_run();
        let report = seq
            .run_to_completion(&ctx, &AtomicBool::new(false))
            .unwrap();
        assert_eq!(report.completed.len(), 3);
        assert!(!path.exists());
    }

    #[test]
    fn reset_returns_everything_to_pending() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("steps.json");
        let TestContext { ctx, .. } = make_context(dir.path());
        let (steps, _) = chain(false);
        let mut seq = Sequencer::open(steps, &path).unwrap();
        seq.run_to_completion(&ctx, &AtomicBool::new(false))
            .unwrap();
        seq.set_reboot_required(true).unwrap();
        seq.reset().unwrap();
        assert!(seq.entries().iter().all(|e| e.state == StepState::Pending));
        assert!(!StepRecord::load(&path).unwrap().reboot_required);
    }
}

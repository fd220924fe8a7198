//! Command: run the setup steps, resuming where the last run stopped.
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context as _, Result, bail};

use super::CommandSetup;
use crate::cli::{GlobalOpts, InstallOpts};
use crate::logging::{Log as _, Logger};
use crate::sequencer::{RunReport, Sequencer, Step};
use crate::steps::{StepContext, all_setup_steps};

/// Run the install command.
///
/// # Errors
///
/// Returns an error if the selection is invalid, the step record cannot be
/// used, any step fails, or the run was interrupted.
pub fn run(
    global: &GlobalOpts,
    opts: &InstallOpts,
    log: &Arc<Logger>,
    abort: &AtomicBool,
) -> Result<()> {
    let setup = CommandSetup::init(global, log)?;
    log.info(&format!("meshnode {}", super::version::VERSION));
    log.info(&format!("hardware: {}", setup.hardware));

    let mut install = setup.settings.install.clone();
    if let Some(channel) = opts.channel {
        install.channel = channel;
    }
    if opts.no_sudo {
        install.use_sudo = false;
    }
    if let Some(name) = &opts.hat_config {
        install.hat_config = Some(name.clone());
    }
    let include_editor = opts.editor || install.open_editor;

    log.stage("Building selection");
    let selection = setup.build_selection(&opts.selection, log)?;

    let ctx = setup.step_context(install, selection, log);
    let report = run_steps(
        &ctx,
        all_setup_steps(include_editor),
        &setup.settings.paths.state_file,
        abort,
    );
    log.print_summary();
    let report = report?;

    if report.reboot_required {
        log.warn("boot config changed; reboot to apply");
    }
    if report.aborted {
        bail!("interrupted; run `meshnode install` again to continue");
    }
    report.into_result()?;
    Ok(())
}

/// Open the step record and drive `steps` until nothing is eligible.
///
/// # Errors
///
/// Returns an error if the step graph is invalid or the record cannot be
/// read or written.
pub fn run_steps(
    ctx: &StepContext,
    steps: Vec<Box<dyn Step>>,
    state_file: &Path,
    abort: &AtomicBool,
) -> Result<RunReport> {
    let mut seq = Sequencer::open(steps, state_file).context("opening the step record")?;
    if ctx.dry_run {
        seq = seq.dry_run();
    }
    Ok(seq.run_to_completion(ctx, abort)?)
}

/// Set a flag on the first Ctrl-C; exit on the second.
///
/// The running step always finishes; the sequencer checks the flag before
/// starting the next one.
///
/// # Errors
///
/// Returns an error if a handler is already installed.
pub fn install_interrupt_handler() -> Result<Arc<AtomicBool>> {
    let abort = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&abort);
    ctrlc::set_handler(move || {
        if flag.swap(true, Ordering::SeqCst) {
            eprintln!("\nSecond interrupt, exiting immediately");
            std::process::exit(130);
        }
        eprintln!("\nInterrupt received, stopping after the current step...");
    })
    .context("installing the Ctrl-C handler")?;
    Ok(abort)
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::options::{Assignments, OptionValue};
    use crate::sequencer::{StepRecord, StepState};
    use crate::steps::test_helpers::{MockExecutor, TestContext, make_context_with};

    fn selection() -> Assignments {
        [
            ("spi_enable".to_string(), OptionValue::Flag(true)),
            ("radio.region".to_string(), OptionValue::from("US")),
        ]
        .into_iter()
        .collect()
    }

    #[test]
    fn fresh_node_runs_every_step() {
        let dir = tempfile::tempdir().unwrap();
        // Every status check fails, every action succeeds.
        let checks = MockExecutor::with_responses(vec![(false, ""); 2]);
        let TestContext { mut ctx, log, .. } = make_context_with(dir.path(), checks);
        ctx.selection = selection();
        let state = dir.path().join("steps.json");

        let report = run_steps(&ctx, all_setup_steps(false), &state, &AtomicBool::new(false))
            .unwrap();
        assert!(report.failed.is_empty(), "{report:?}");
        assert!(report.reboot_required);
        assert_eq!(log.failure_count(), 0);

        let record = StepRecord::load(&state).unwrap();
        assert!(record.steps.iter().all(|e| e.state == StepState::Done));
        assert!(std::fs::read_to_string(dir.path().join("config.txt"))
            .unwrap()
            .contains("dtparam=spi=on"));
    }

    #[test]
    fn interrupted_run_resumes_where_it_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let TestContext { ctx, .. } = make_context_with(dir.path(), MockExecutor::default());
        let state = dir.path().join("steps.json");

        let report =
            run_steps(&ctx, all_setup_steps(false), &state, &AtomicBool::new(true)).unwrap();
        assert!(report.aborted);
        assert!(report.completed.is_empty());

        let report = run_steps(&ctx, all_setup_steps(false), &state, &AtomicBool::new(false))
            .unwrap();
        assert!(!report.aborted);
        assert_eq!(report.completed.len(), all_setup_steps(false).len());
    }

    #[test]
    fn headless_editor_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let TestContext { ctx, log, .. } = make_context_with(dir.path(), MockExecutor::default());
        let state = dir.path().join("steps.json");

        let report = run_steps(&ctx, all_setup_steps(true), &state, &AtomicBool::new(false))
            .unwrap();
        assert_eq!(report.failed, ["Open config editor"]);
        assert_eq!(log.failure_count(), 1);
        assert!(report.into_result().is_err());
    }

    #[test]
    fn dry_run_keeps_no_record() {
        let dir = tempfile::tempdir().unwrap();
        let TestContext { mut ctx, .. } =
            make_context_with(dir.path(), MockExecutor::with_responses(vec![(false, ""); 2]));
        ctx.dry_run = true;
        ctx.selection = selection();
        let state = dir.path().join("steps.json");

        run_steps(&ctx, all_setup_steps(false), &state, &AtomicBool::new(false)).unwrap();
        assert!(!state.exists());
        assert!(!dir.path().join("config.txt").exists());
    }
}
